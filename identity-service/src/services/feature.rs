use super::ServiceError;

/// A capability that exists only when its backing infrastructure is
/// configured. Callers branch once through [`Feature::require`] instead of
/// threading `Option`s through every operation.
#[derive(Clone)]
pub enum Feature<T> {
    Enabled(T),
    Disabled,
}

impl<T> Feature<T> {
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Feature::Enabled(v),
            None => Feature::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Feature::Enabled(_))
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            Feature::Enabled(v) => Some(v),
            Feature::Disabled => None,
        }
    }

    /// The capability, or `FeatureDisabled(name)` when it is not configured.
    pub fn require(&self, name: &'static str) -> Result<&T, ServiceError> {
        self.as_option().ok_or(ServiceError::FeatureDisabled(name))
    }
}
