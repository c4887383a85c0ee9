use crate::utils::error::{FlowError, Result};
use crate::utils::ids::random_identifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type Value = serde_json::Value;

macro_rules! string_id {
    ($name:ident, $len:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn new_random() -> Self {
                Self(random_identifier($len))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(BlockId, 8);
string_id!(ConnectionId, 8);
string_id!(GraphId, 32);

/// Permission bitset stored per user and graph: read=1, write=2, execute=4,
/// further flags continue at 8, 16, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u32);

impl Permissions {
    pub const READ: u32 = 1;
    pub const WRITE: u32 = 2;
    pub const EXECUTE: u32 = 4;

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Highest number of flags that fit in the bitset.
    pub const MAX_FLAGS: usize = u32::BITS as usize;

    pub fn from_flags(read: bool, write: bool, execute: bool, others: &[bool]) -> Result<Self> {
        if others.len() > Self::MAX_FLAGS - 3 {
            return Err(FlowError::ValidationError {
                message: format!(
                    "At most {} permission flags are supported, got {}",
                    Self::MAX_FLAGS,
                    others.len() + 3
                ),
            });
        }
        let mut bits = 0;
        if read {
            bits |= Self::READ;
        }
        if write {
            bits |= Self::WRITE;
        }
        if execute {
            bits |= Self::EXECUTE;
        }
        for (offset, flag) in others.iter().enumerate() {
            if *flag {
                bits |= 8 << offset;
            }
        }
        Ok(Self(bits))
    }

    /// Flags in `[read, write, execute, ...]` order, as sent by gateway clients.
    pub fn from_flag_list(flags: &[bool]) -> Result<Self> {
        let flag = |i: usize| flags.get(i).copied().unwrap_or(false);
        Self::from_flags(flag(0), flag(1), flag(2), flags.get(3..).unwrap_or(&[]))
    }

    pub fn owner() -> Self {
        Self(Self::READ | Self::WRITE | Self::EXECUTE)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn can_view(self) -> bool {
        self.0 & Self::READ == Self::READ
    }

    pub fn can_edit(self) -> bool {
        self.0 & Self::WRITE == Self::WRITE
    }

    pub fn can_run(self) -> bool {
        self.0 & Self::EXECUTE == Self::EXECUTE
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Permissions {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|e| FlowError::StoreError {
                message: format!("Invalid permission value '{}': {}", s, e),
            })
    }
}

/// Operations a gateway client can request on graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    View,
    Edit,
    Delete,
    List,
    Run,
    Share,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::View => "view",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::List => "list",
            Action::Run => "run",
            Action::Share => "share",
        }
    }

    /// Whether the action targets one existing graph.
    pub fn needs_graph(self) -> bool {
        !matches!(self, Action::Create | Action::List)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Action::Create),
            "view" => Ok(Action::View),
            "edit" => Ok(Action::Edit),
            "delete" => Ok(Action::Delete),
            "list" => Ok(Action::List),
            "run" => Ok(Action::Run),
            "share" => Ok(Action::Share),
            other => Err(FlowError::ValidationError {
                message: format!("Unknown action {}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_from_flags() {
        assert_eq!(Permissions::from_flags(false, false, false, &[]).unwrap().bits(), 0);
        assert_eq!(Permissions::from_flags(true, false, false, &[]).unwrap().bits(), 1);
        assert_eq!(Permissions::from_flags(true, true, true, &[]).unwrap().bits(), 7);
        assert_eq!(
            Permissions::from_flags(false, true, false, &[true, false, true]).unwrap().bits(),
            2 + 8 + 32
        );
        assert_eq!(Permissions::owner().bits(), 7);
    }

    #[test]
    fn test_permissions_flag_limit() {
        let mut flags = vec![false; Permissions::MAX_FLAGS];
        flags[Permissions::MAX_FLAGS - 1] = true;
        assert_eq!(Permissions::from_flag_list(&flags).unwrap().bits(), 1 << 31);

        let mut oversized = vec![false; 35];
        oversized.push(true);
        assert!(matches!(
            Permissions::from_flag_list(&oversized),
            Err(FlowError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_permissions_checks() {
        let view_only = Permissions::from_flag_list(&[true]).unwrap();
        assert!(view_only.can_view());
        assert!(!view_only.can_edit());
        assert!(!view_only.can_run());

        let runner = Permissions::from_bits(4);
        assert!(runner.can_run());
        assert!(!runner.can_view());
        assert_eq!("6".parse::<Permissions>().unwrap().bits(), 6);
        assert!("x".parse::<Permissions>().is_err());
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("share".parse::<Action>().unwrap(), Action::Share);
        assert!("explode".parse::<Action>().is_err());
        assert!(!Action::List.needs_graph());
        assert!(Action::Run.needs_graph());
    }

    #[test]
    fn test_random_ids_have_expected_length() {
        assert_eq!(BlockId::new_random().as_str().len(), 8);
        assert_eq!(GraphId::new_random().as_str().len(), 32);
    }
}
