//! Lifecycle event names.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// A record was created.
    Create,
    /// One or more records were updated.
    Update,
    /// One or more records were deleted.
    Delete,
}

impl Operation {
    /// All operations, in lifecycle order.
    pub const ALL: [Operation; 3] = [Operation::Create, Operation::Update, Operation::Delete];

    /// Returns the keyword used in event names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }
}

/// A host event name, `{resource}.items.{operation}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventName {
    resource: String,
    operation: Operation,
}

impl EventName {
    /// Creates an event name for a resource and operation.
    pub fn new(resource: impl Into<String>, operation: Operation) -> Self {
        Self {
            resource: resource.into(),
            operation,
        }
    }

    /// The resource (collection) the event concerns.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The operation.
    pub fn operation(&self) -> Operation {
        self.operation
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.items.{}", self.resource, self.operation)
    }
}

impl FromStr for EventName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidEventName(s.to_string());

        let (resource, rest) = s.split_once(".items.").ok_or_else(invalid)?;
        if resource.is_empty() || resource.contains('.') {
            return Err(invalid());
        }
        let operation = rest.parse::<Operation>().map_err(|_| invalid())?;

        Ok(Self::new(resource, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let name: EventName = "products.items.delete".parse().unwrap();
        assert_eq!(name.resource(), "products");
        assert_eq!(name.operation(), Operation::Delete);
        assert_eq!(name.to_string(), "products.items.delete");
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in [
            "products.create",
            ".items.create",
            "products.items.upsert",
            "a.b.items.create",
            "products.items.",
        ] {
            assert!(
                matches!(bad.parse::<EventName>(), Err(ProtocolError::InvalidEventName(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn operation_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert!("merge".parse::<Operation>().is_err());
    }

    #[test]
    fn operation_serializes_as_keyword() {
        assert_eq!(serde_json::to_string(&Operation::Delete).unwrap(), "\"delete\"");
        let op: Operation = serde_json::from_str("\"update\"").unwrap();
        assert_eq!(op, Operation::Update);
    }

    proptest::proptest! {
        #[test]
        fn parsed_names_display_as_input(s in "[a-z.]{0,12}(\\.items\\.)?[a-z]{0,8}") {
            if let Ok(name) = s.parse::<EventName>() {
                proptest::prop_assert_eq!(name.to_string(), s);
            }
        }
    }
}
