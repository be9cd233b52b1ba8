use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Field metadata
// ════════════════════════════════════════════════════════════════

/// Scalar type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int,
    String,
}

impl FieldType {
    /// GraphQL spelling of the type (non-null).
    pub fn graphql(&self) -> &'static str {
        match self {
            FieldType::Int => "Int!",
            FieldType::String => "String!",
        }
    }
}

/// Declared data field of an entity (the `id` column is implied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: FieldType,
}

impl FieldDef {
    pub const fn int(name: &'static str) -> Self {
        Self { name, ty: FieldType::Int }
    }

    pub const fn string(name: &'static str) -> Self {
        Self { name, ty: FieldType::String }
    }
}

// ════════════════════════════════════════════════════════════════
//  Entity
// ════════════════════════════════════════════════════════════════

/// A record type persisted in its own table.
///
/// `Draft` is the create payload (every data field required), `Patch` the
/// update payload (every data field optional). Both deserialize straight
/// from operation arguments, so a missing required field surfaces as a
/// validation error.
pub trait Entity:
    Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync + 'static
{
    type Draft: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static;
    type Patch: Serialize + DeserializeOwned + Clone + Debug + Default + Send + Sync + 'static;

    /// Type name, e.g. `Post`.
    const TYPE_NAME: &'static str;
    /// Single-record query field, e.g. `post`.
    const SINGULAR: &'static str;
    /// List query field, e.g. `posts`.
    const PLURAL: &'static str;
    /// Backing table.
    const TABLE: &'static str;
    /// Data fields in column order.
    const FIELDS: &'static [FieldDef];

    fn id(&self) -> i64;

    fn from_draft(id: i64, draft: Self::Draft) -> Self;

    /// Overwrite every field present in `patch`.
    fn apply(&mut self, patch: Self::Patch);
}

// ════════════════════════════════════════════════════════════════
//  Post
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Entity for Post {
    type Draft = PostDraft;
    type Patch = PostPatch;

    const TYPE_NAME: &'static str = "Post";
    const SINGULAR: &'static str = "post";
    const PLURAL: &'static str = "posts";
    const TABLE: &'static str = "posts";
    const FIELDS: &'static [FieldDef] = &[FieldDef::string("title"), FieldDef::string("content")];

    fn id(&self) -> i64 {
        self.id
    }

    fn from_draft(id: i64, draft: PostDraft) -> Self {
        Self { id, title: draft.title, content: draft.content }
    }

    fn apply(&mut self, patch: PostPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  User
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub age: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDraft {
    pub name: String,
    pub email: String,
    pub age: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
}

impl Entity for User {
    type Draft = UserDraft;
    type Patch = UserPatch;

    const TYPE_NAME: &'static str = "User";
    const SINGULAR: &'static str = "user";
    const PLURAL: &'static str = "users";
    const TABLE: &'static str = "users";
    const FIELDS: &'static [FieldDef] = &[
        FieldDef::string("name"),
        FieldDef::string("email"),
        FieldDef::int("age"),
    ];

    fn id(&self) -> i64 {
        self.id
    }

    fn from_draft(id: i64, draft: UserDraft) -> Self {
        Self { id, name: draft.name, email: draft.email, age: draft.age }
    }

    fn apply(&mut self, patch: UserPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(email) = patch.email {
            self.email = email;
        }
        if let Some(age) = patch.age {
            self.age = age;
        }
    }
}
