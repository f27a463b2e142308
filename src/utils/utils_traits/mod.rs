use std::path::Path;
use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::utils::utils_errors::PlanningError;
use crate::utils::utils_files::{FileUtils, load_object_from_json_string, load_object_from_string, save_object_to_string, SerializationFormat};

/// Anything that can be written to and read back from a scene/config/request file.
pub trait SaveAndLoadable: Serialize + DeserializeOwned {
    fn get_serialization_string(&self) -> Result<String, PlanningError> {
        save_object_to_string(self, &SerializationFormat::Json)
    }
    fn save_to_path(&self, path: &Path) -> Result<(), PlanningError> {
        FileUtils::save_object_to_file(self, path)
    }
    fn load_from_path(path: &Path) -> Result<Self, PlanningError> where Self: Sized {
        FileUtils::load_object_from_file(path)
    }
    fn load_from_json_string(json_str: &str) -> Result<Self, PlanningError> where Self: Sized {
        load_object_from_json_string(json_str)
    }
}

pub trait ToAndFromRonString: Serialize + DeserializeOwned {
    fn convert_to_ron_string(&self) -> Result<String, PlanningError> {
        save_object_to_string(self, &SerializationFormat::Ron)
    }
    fn load_from_ron_string(ron_string: &str) -> Result<Self, PlanningError> where Self: Sized {
        load_object_from_string(ron_string, &SerializationFormat::Ron)
    }
}
impl <T> ToAndFromRonString for T where T: Serialize + DeserializeOwned {  }
