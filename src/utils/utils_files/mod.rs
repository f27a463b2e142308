use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use crate::utils::utils_errors::PlanningError;

/// Convenience struct that holds many class functions related to file utils.
pub struct FileUtils;
impl FileUtils {
    /// Reads contents of file and outputs it to a string.
    pub fn read_file_contents_to_string(p: &Path) -> Result<String, PlanningError> {
        let mut file_res = File::open(p);
        return match &mut file_res {
            Ok(f) => {
                let mut contents = String::new();
                f.read_to_string(&mut contents).map_err(|e| PlanningError::new_io_error(&e.to_string(), file!(), line!()))?;
                Ok(contents)
            }
            Err(e) => {
                Err(PlanningError::new_io_error(&format!("could not open {:?}: {}", p, e), file!(), line!()))
            }
        }
    }
    /// Returns file extension of path as a lowercase string.
    pub fn get_file_extension_string(p: &Path) -> Option<String> {
        p.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase())
    }
    /// Loads an object from a file, picking the format from the extension (`json`, `ron`, or `toml`).
    pub fn load_object_from_file<T: DeserializeOwned>(p: &Path) -> Result<T, PlanningError> {
        let contents = Self::read_file_contents_to_string(p)?;
        let format = SerializationFormat::from_path(p)?;
        load_object_from_string(&contents, &format)
    }
    /// Saves given object to a file.  The format is picked from the extension of the path.
    pub fn save_object_to_file<T: Serialize>(object: &T, p: &Path) -> Result<(), PlanningError> {
        let format = SerializationFormat::from_path(p)?;
        let s = save_object_to_string(object, &format)?;
        let mut file = File::create(p).map_err(|e| PlanningError::new_io_error(&format!("could not create {:?}: {}", p, e), file!(), line!()))?;
        file.write_all(s.as_bytes()).map_err(|e| PlanningError::new_io_error(&e.to_string(), file!(), line!()))?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SerializationFormat {
    Json,
    Ron,
    Toml
}
impl SerializationFormat {
    pub fn from_path(p: &Path) -> Result<Self, PlanningError> {
        return match FileUtils::get_file_extension_string(p).as_deref() {
            Some("json") => { Ok(Self::Json) }
            Some("ron") => { Ok(Self::Ron) }
            Some("toml") => { Ok(Self::Toml) }
            _ => { Err(PlanningError::new_parse_error(&format!("unsupported file extension for {:?}.  Expected json, ron, or toml.", p), file!(), line!())) }
        }
    }
}

pub fn load_object_from_string<T: DeserializeOwned>(s: &str, format: &SerializationFormat) -> Result<T, PlanningError> {
    let res: Result<T, String> = match format {
        SerializationFormat::Json => { serde_json::from_str(s).map_err(|e| e.to_string()) }
        SerializationFormat::Ron => { ron::from_str(s).map_err(|e| e.to_string()) }
        SerializationFormat::Toml => { toml::from_str(s).map_err(|e| e.to_string()) }
    };
    return match res {
        Ok(o) => { Ok(o) }
        Err(e) => {
            warn!(?format, num_bytes = s.len(), error = %e, "could not deserialize object");
            Err(PlanningError::new_parse_error(&format!("the given {:?} string is incompatible with the requested type: {}", format, e), file!(), line!()))
        }
    }
}

pub fn load_object_from_json_string<T: DeserializeOwned>(json_str: &str) -> Result<T, PlanningError> {
    load_object_from_string(json_str, &SerializationFormat::Json)
}

pub fn save_object_to_string<T: Serialize>(object: &T, format: &SerializationFormat) -> Result<String, PlanningError> {
    let res: Result<String, String> = match format {
        SerializationFormat::Json => { serde_json::to_string_pretty(object).map_err(|e| e.to_string()) }
        SerializationFormat::Ron => { ron::ser::to_string_pretty(object, ron::ser::PrettyConfig::default()).map_err(|e| e.to_string()) }
        SerializationFormat::Toml => { toml::to_string(object).map_err(|e| e.to_string()) }
    };
    res.map_err(|e| PlanningError::new_parse_error(&format!("could not serialize object as {:?}: {}", format, e), file!(), line!()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn format_is_picked_from_extension() {
        assert_eq!(SerializationFormat::from_path(&PathBuf::from("scene.JSON")).unwrap(), SerializationFormat::Json);
        assert_eq!(SerializationFormat::from_path(&PathBuf::from("a/b/config.toml")).unwrap(), SerializationFormat::Toml);
        assert_eq!(SerializationFormat::from_path(&PathBuf::from("request.ron")).unwrap(), SerializationFormat::Ron);
        assert!(SerializationFormat::from_path(&PathBuf::from("scene.urdf")).is_err());
    }

    #[test]
    fn malformed_input_is_a_parse_error_naming_the_cause() {
        let err = load_object_from_json_string::<Vec<f64>>("[1.0, oops]").unwrap_err();
        match err {
            PlanningError::ParseError(msg) => {
                assert!(msg.contains("Json"), "{}", msg);
                assert!(msg.contains("line 1"), "{}", msg);
            }
            e => { panic!("unexpected error {:?}", e) }
        }
        assert!(load_object_from_string::<Vec<f64>>("x = ", &SerializationFormat::Toml).is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = FileUtils::read_file_contents_to_string(&PathBuf::from("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, PlanningError::IoError(_)));
    }
}
