use crate::entry::ConfigKind;
use meshreg_core::ServiceId;

/// Key schema for meshreg.
///
/// All keys are prefixed with the configured prefix (default: `meshreg`).
///
/// Schema:
/// ```text
/// meshreg/desired/{partition}/{namespace}/{name}
/// meshreg/locks/{partition}/{namespace}/{name}
/// meshreg/config/{kind}/{partition}/{namespace}/{name}
/// ```
#[derive(Debug, Clone)]
pub struct KeySchema {
    prefix: String,
}

impl KeySchema {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/').to_string();
        Self { prefix }
    }

    fn join(&self, rest: std::fmt::Arguments<'_>) -> String {
        if self.prefix.is_empty() {
            rest.to_string()
        } else {
            format!("{}/{}", self.prefix, rest)
        }
    }

    /// Desired-state record for a service.
    pub fn desired_key(&self, id: &ServiceId) -> String {
        self.join(format_args!(
            "desired/{}/{}/{}",
            id.partition, id.namespace, id.name
        ))
    }

    /// Lock guarding reconciliation of a service.
    pub fn lock_key(&self, id: &ServiceId) -> String {
        self.join(format_args!(
            "locks/{}/{}/{}",
            id.partition, id.namespace, id.name
        ))
    }

    pub fn config_entry_key(&self, kind: ConfigKind, id: &ServiceId) -> String {
        self.join(format_args!(
            "config/{}/{}/{}/{}",
            kind.as_str(),
            id.partition,
            id.namespace,
            id.name
        ))
    }
}
