//! Permission evaluation.
//!
//! [`permission_check`] is a pure function of the context and the requested
//! level. Handlers usually go through [`check`], which reads the active
//! context and turns a failed check into a [`HandlerError::Denied`] that the
//! dispatcher maps to a reply.

use {antares_common::types::ChatType, bitflags::bitflags};

use crate::{
    callback::{Denial, HandlerError},
    context::{self, Context},
};

bitflags! {
    /// Conditions a handler may require.
    ///
    /// `OWNER` is one condition. `PRIVATE` and `GROUP` together form a single
    /// chat-type condition that holds when the chat is any of the flagged kinds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CheckLevel: u8 {
        const OWNER   = 1;
        const PRIVATE = 1 << 1;
        const GROUP   = 1 << 2;
    }
}

/// How the conditions of a [`CheckLevel`] combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConditionLimit {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Passed,
    InvalidUser,
    InvalidChatType,
    IgnoreChannelUpdate,
}

impl PermissionState {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn into_result(self) -> Result<(), HandlerError> {
        match self {
            Self::Passed => Ok(()),
            Self::InvalidUser => Err(HandlerError::Denied(Denial::InvalidUser)),
            Self::InvalidChatType => Err(HandlerError::Denied(Denial::InvalidChatType)),
            Self::IgnoreChannelUpdate => Err(HandlerError::Denied(Denial::IgnoreChannelUpdate)),
        }
    }
}

pub fn permission_check(ctx: &Context, level: CheckLevel, limit: ConditionLimit) -> PermissionState {
    if level.is_empty() {
        return PermissionState::Passed;
    }
    // Channel posts carry no sender; nothing can be checked against them.
    if ctx.chat_type() == ChatType::Channel {
        return PermissionState::IgnoreChannelUpdate;
    }

    let owner = level
        .contains(CheckLevel::OWNER)
        .then(|| ctx.is_owner());
    let chat = level
        .intersects(CheckLevel::PRIVATE | CheckLevel::GROUP)
        .then(|| chat_type_allowed(ctx.chat_type(), level));

    match limit {
        ConditionLimit::All => match (owner, chat) {
            (Some(false), _) => PermissionState::InvalidUser,
            (_, Some(false)) => PermissionState::InvalidChatType,
            _ => PermissionState::Passed,
        },
        ConditionLimit::Any => {
            if owner == Some(true) || chat == Some(true) {
                PermissionState::Passed
            } else if owner.is_some() {
                PermissionState::InvalidUser
            } else {
                PermissionState::InvalidChatType
            }
        },
    }
}

fn chat_type_allowed(chat_type: ChatType, level: CheckLevel) -> bool {
    (level.contains(CheckLevel::PRIVATE) && chat_type == ChatType::Private)
        || (level.contains(CheckLevel::GROUP) && chat_type.is_group())
}

/// Check the active invocation against `level`.
///
/// Outside of an invocation this fails with [`crate::Error::NoContext`].
pub fn check(level: CheckLevel, limit: ConditionLimit) -> Result<(), HandlerError> {
    let ctx = context::require().map_err(anyhow::Error::from)?;
    permission_check(&ctx, level, limit).into_result()
}

/// Whether the active invocation comes from the owner. False outside of an
/// invocation.
pub fn is_owner() -> bool {
    context::current().is_some_and(|ctx| ctx.is_owner())
}
