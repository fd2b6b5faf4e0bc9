//! Enum types stored as small integer columns.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a cafe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CafeStatus {
    Closed,
    Active,
    Verified,
    Official,
}

impl CafeStatus {
    /// Column value.
    pub fn code(self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::Active => 1,
            Self::Verified => 6,
            Self::Official => 9,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Closed),
            1 => Some(Self::Active),
            6 => Some(Self::Verified),
            9 => Some(Self::Official),
            _ => None,
        }
    }
}

/// Who may post in a cafe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CafePermission {
    Public,
    Subscriber,
    Member,
}

impl CafePermission {
    pub fn code(self) -> i64 {
        match self {
            Self::Public => 0,
            Self::Subscriber => 3,
            Self::Member => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Public),
            3 => Some(Self::Subscriber),
            6 => Some(Self::Member),
            _ => None,
        }
    }
}

/// A user's role inside a cafe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberRole {
    Visitor,
    Subscriber,
    Member,
    Admin,
}

impl MemberRole {
    pub fn code(self) -> i64 {
        match self {
            Self::Visitor => 0,
            Self::Subscriber => 2,
            Self::Member => 3,
            Self::Admin => 9,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Visitor),
            2 => Some(Self::Subscriber),
            3 => Some(Self::Member),
            9 => Some(Self::Admin),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cafe_status_codes_roundtrip() {
        for status in [
            CafeStatus::Closed,
            CafeStatus::Active,
            CafeStatus::Verified,
            CafeStatus::Official,
        ] {
            assert_eq!(CafeStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(CafeStatus::from_code(5), None);
    }

    #[test]
    fn test_permission_and_role_codes() {
        assert_eq!(CafePermission::from_code(3), Some(CafePermission::Subscriber));
        assert_eq!(CafePermission::from_code(1), None);
        assert_eq!(MemberRole::from_code(9), Some(MemberRole::Admin));
        assert_eq!(MemberRole::Member.code(), 3);
    }
}
