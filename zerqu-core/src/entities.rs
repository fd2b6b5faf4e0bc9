//! Forum records: users, cafes, topics and cafe memberships.

use crate::entity::Entity;
use crate::enums::{CafePermission, CafeStatus, MemberRole};
use crate::filter::FieldValue;
use crate::identity::{RowId, Timestamp};
use serde::{Deserialize, Serialize};

/// A registered account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: RowId,
    pub username: String,
    pub email: String,
    pub description: Option<String>,
    pub reputation: i64,
    pub created_at: Timestamp,
}

impl Entity for User {
    type Id = RowId;
    const TABLE: &'static str = "zq_user";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];

    fn primary_key(&self) -> RowId {
        self.id
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.into()),
            "username" => Some(self.username.as_str().into()),
            "email" => Some(self.email.as_str().into()),
            "description" => Some(self.description.clone().into()),
            "reputation" => Some(self.reputation.into()),
            "created_at" => Some(self.created_at.timestamp().into()),
            _ => None,
        }
    }
}

/// A board that groups topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cafe {
    pub id: RowId,
    pub name: String,
    pub slug: String,
    pub content: String,
    pub permission: CafePermission,
    pub status: CafeStatus,
    /// Owner.
    pub user_id: RowId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Entity for Cafe {
    type Id = RowId;
    const TABLE: &'static str = "zq_cafe";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];

    fn primary_key(&self) -> RowId {
        self.id
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            "slug" => Some(self.slug.as_str().into()),
            "content" => Some(self.content.as_str().into()),
            "permission" => Some(self.permission.code().into()),
            "status" => Some(self.status.code().into()),
            "user_id" => Some(self.user_id.into()),
            "created_at" => Some(self.created_at.timestamp().into()),
            "updated_at" => Some(self.updated_at.timestamp().into()),
            _ => None,
        }
    }
}

/// A discussion thread inside a cafe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: RowId,
    pub cafe_id: RowId,
    pub user_id: RowId,
    pub title: String,
    pub content: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Entity for Topic {
    type Id = RowId;
    const TABLE: &'static str = "zq_topic";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];

    fn primary_key(&self) -> RowId {
        self.id
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.into()),
            "cafe_id" => Some(self.cafe_id.into()),
            "user_id" => Some(self.user_id.into()),
            "title" => Some(self.title.as_str().into()),
            "content" => Some(self.content.as_str().into()),
            "created_at" => Some(self.created_at.timestamp().into()),
            "updated_at" => Some(self.updated_at.timestamp().into()),
            _ => None,
        }
    }
}

/// Membership of a user in a cafe. Keyed by `(cafe_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CafeMember {
    pub cafe_id: RowId,
    pub user_id: RowId,
    pub role: MemberRole,
    pub created_at: Timestamp,
}

impl Entity for CafeMember {
    type Id = (RowId, RowId);
    const TABLE: &'static str = "zq_cafe_member";
    const PRIMARY_KEY: &'static [&'static str] = &["cafe_id", "user_id"];

    fn primary_key(&self) -> (RowId, RowId) {
        (self.cafe_id, self.user_id)
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "cafe_id" => Some(self.cafe_id.into()),
            "user_id" => Some(self.user_id.into()),
            "role" => Some(self.role.code().into()),
            "created_at" => Some(self.created_at.timestamp().into()),
            _ => None,
        }
    }
}
