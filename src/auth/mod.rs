//! Accounts, tokens and sign-in.
//!
//! Signing in seeds a user row for the requested account kind, mints a token
//! from the fake identity provider and exchanges it for a service token.

// FIXME(rust-lang/rust#130021): drop once derive expansion stops tripping
// `unused_assignments`.
#![allow(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    unused_assignments
)]

mod accounts;
mod identity;

pub use accounts::{AccountStore, NewUser, PgAccountStore, SignedIn, sign_in};
pub use identity::IdentityClient;

#[cfg(test)]
pub use accounts::MockAccountStore;

use async_trait::async_trait;
use miette::Diagnostic;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Token sent by scenarios that must be rejected as unauthenticated.
pub const UNAUTHENTICATED_TOKEN: &str = "random-token";

/// Errors raised while resolving accounts.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum AuthError {
    /// The account kind in a step is not one the harness can create.
    #[error("unknown account kind '{0}'")]
    #[diagnostic(
        code(campus_bdd::auth::unknown_account),
        help("use one of: school admin, admin, teacher, student, parent, unauthenticated")
    )]
    UnknownAccount(String),
}

/// Role group stamped on user rows and exchanged tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserGroup {
    /// Organisation administrator.
    SchoolAdmin,
    /// Platform administrator.
    Admin,
    /// Teacher.
    Teacher,
    /// Learner.
    Student,
    /// Guardian of a learner.
    Parent,
}

impl UserGroup {
    /// Wire name of the group.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SchoolAdmin => "USER_GROUP_SCHOOL_ADMIN",
            Self::Admin => "USER_GROUP_ADMIN",
            Self::Teacher => "USER_GROUP_TEACHER",
            Self::Student => "USER_GROUP_STUDENT",
            Self::Parent => "USER_GROUP_PARENT",
        }
    }
}

impl fmt::Display for UserGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account kinds named in feature files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountKind {
    /// `school admin`
    SchoolAdmin,
    /// `admin`
    Admin,
    /// `teacher`
    Teacher,
    /// `student`
    Student,
    /// `parent`
    Parent,
    /// `unauthenticated`: no user row and a token every service rejects.
    Unauthenticated,
}

impl AccountKind {
    /// Group a user of this kind belongs to, if any.
    #[must_use]
    pub const fn user_group(self) -> Option<UserGroup> {
        match self {
            Self::SchoolAdmin => Some(UserGroup::SchoolAdmin),
            Self::Admin => Some(UserGroup::Admin),
            Self::Teacher => Some(UserGroup::Teacher),
            Self::Student => Some(UserGroup::Student),
            Self::Parent => Some(UserGroup::Parent),
            Self::Unauthenticated => None,
        }
    }
}

impl FromStr for AccountKind {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "school admin" => Ok(Self::SchoolAdmin),
            "admin" => Ok(Self::Admin),
            "teacher" => Ok(Self::Teacher),
            "student" => Ok(Self::Student),
            "parent" => Ok(Self::Parent),
            "unauthenticated" => Ok(Self::Unauthenticated),
            _ => Err(AuthError::UnknownAccount(s.to_owned())),
        }
    }
}

/// Identity a scenario acts under when seeding data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Acting user.
    pub user_id: String,
    /// Group of the acting user.
    pub group: UserGroup,
    /// Organisation.
    pub school_id: i64,
    /// Tenant path stamped on seeded rows.
    pub resource_path: String,
}

/// Issues service tokens for seeded users.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Return a service token for `user_id` acting as `group`.
    async fn issue(&self, user_id: &str, group: UserGroup) -> anyhow::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("school admin", AccountKind::SchoolAdmin)]
    #[case("School Admin", AccountKind::SchoolAdmin)]
    #[case(" teacher ", AccountKind::Teacher)]
    #[case("unauthenticated", AccountKind::Unauthenticated)]
    fn account_kinds_parse(#[case] text: &str, #[case] expected: AccountKind) {
        assert_eq!(text.parse::<AccountKind>(), Ok(expected));
    }

    #[test]
    fn unknown_account_is_rejected() {
        assert_eq!(
            "janitor".parse::<AccountKind>(),
            Err(AuthError::UnknownAccount("janitor".to_owned()))
        );
    }

    #[test]
    fn unauthenticated_has_no_group() {
        assert_eq!(AccountKind::Unauthenticated.user_group(), None);
        assert_eq!(
            AccountKind::Parent.user_group().map(UserGroup::as_str),
            Some("USER_GROUP_PARENT")
        );
    }
}
