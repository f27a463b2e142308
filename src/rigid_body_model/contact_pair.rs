use serde::{Deserialize, Serialize};
use crate::utils::utils_errors::PlanningError;

/// Two bodies whose geometries may touch, along with the Coulomb friction coefficient of
/// the interface.  Pairs are created once at model load and never change afterwards.
///
/// A pair whose bodies can never be in contact (welded together, both static, or the same
/// body) is still listed so that a request naming it fails loudly instead of silently
/// dropping it.  `skip_reason` records why.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactPair {
    name: String,
    body_a: usize,
    body_b: usize,
    friction_coefficient: f64,
    skip_reason: Option<ContactPairSkipReason>
}
impl ContactPair {
    pub fn new(name: &str, body_a: usize, body_b: usize, friction_coefficient: f64, skip_reason: Option<ContactPairSkipReason>) -> Result<Self, PlanningError> {
        if !(friction_coefficient >= 0.0) || !friction_coefficient.is_finite() {
            return Err(PlanningError::new_model_error(&format!("friction coefficient of pair {:?} must be finite and non-negative, got {}.", name, friction_coefficient), file!(), line!()));
        }
        Ok(Self {
            name: name.to_string(),
            body_a,
            body_b,
            friction_coefficient,
            skip_reason
        })
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn body_a(&self) -> usize {
        self.body_a
    }
    pub fn body_b(&self) -> usize {
        self.body_b
    }
    pub fn friction_coefficient(&self) -> f64 {
        self.friction_coefficient
    }
    pub fn skip_reason(&self) -> &Option<ContactPairSkipReason> {
        &self.skip_reason
    }
    pub fn is_physically_possible(&self) -> bool {
        self.skip_reason.is_none()
    }
    /// Errors with a `ModelError` if the two bodies of this pair can never touch.
    pub fn check_contact_possible(&self) -> Result<(), PlanningError> {
        return match &self.skip_reason {
            None => { Ok(()) }
            Some(reason) => {
                Err(PlanningError::new_model_error(&format!("contact pair {:?} can never be in contact ({}).", self.name, reason.description()), file!(), line!()))
            }
        }
    }
    pub fn involves_body(&self, body_idx: usize) -> bool {
        self.body_a == body_idx || self.body_b == body_idx
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactPairSkipReason {
    SameBody,
    Welded,
    BothStatic
}
impl ContactPairSkipReason {
    pub fn description(&self) -> &'static str {
        match self {
            ContactPairSkipReason::SameBody => { "a body cannot contact itself" }
            ContactPairSkipReason::Welded => { "the bodies are welded together" }
            ContactPairSkipReason::BothStatic => { "both bodies are static" }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welded_pair_is_rejected() {
        let p = ContactPair::new("hand_object", 0, 1, 0.5, Some(ContactPairSkipReason::Welded)).unwrap();
        assert!(!p.is_physically_possible());
        match p.check_contact_possible() {
            Err(PlanningError::ModelError(s)) => { assert!(s.contains("welded")); }
            other => { panic!("unexpected {:?}", other); }
        }
    }

    #[test]
    fn negative_friction_is_a_model_error() {
        assert!(ContactPair::new("p", 0, 1, -0.1, None).is_err());
        let p = ContactPair::new("p", 0, 1, 0.3, None).unwrap();
        assert!(p.check_contact_possible().is_ok());
        assert!(p.involves_body(1) && !p.involves_body(2));
    }
}
