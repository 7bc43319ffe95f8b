use crate::core::EntityRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a to-one association's target, as seen from the owner.
///
/// ```text
/// IdentityOnlyProxy ──access──> Loading ──> Loaded
/// Joined ──first read──> Loaded            (no query)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssociationState {
    /// Target known by identity only
    IdentityOnlyProxy,
    /// Target's base group is being fetched
    Loading,
    Loaded,
    /// Target was populated by the owner's own query
    Joined,
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdentityOnlyProxy => write!(f, "IDENTITY_ONLY_PROXY"),
            Self::Loading => write!(f, "LOADING"),
            Self::Loaded => write!(f, "LOADED"),
            Self::Joined => write!(f, "JOINED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationSlot {
    state: AssociationState,
    target: Option<EntityRef>,
}

impl AssociationSlot {
    /// A null association; nothing left to load.
    pub fn empty() -> Self {
        Self {
            state: AssociationState::Loaded,
            target: None,
        }
    }

    pub fn proxy(target: EntityRef) -> Self {
        Self {
            state: AssociationState::IdentityOnlyProxy,
            target: Some(target),
        }
    }

    pub fn joined(target: EntityRef) -> Self {
        Self {
            state: AssociationState::Joined,
            target: Some(target),
        }
    }

    pub fn loaded(target: EntityRef) -> Self {
        Self {
            state: AssociationState::Loaded,
            target: Some(target),
        }
    }

    pub fn resolved(target: Option<EntityRef>, target_initialized: bool) -> Self {
        match target {
            None => Self::empty(),
            Some(target) if target_initialized => Self::loaded(target),
            Some(target) => Self::proxy(target),
        }
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn target(&self) -> Option<EntityRef> {
        self.target
    }

    /// State as observed without a read: a proxy whose target was initialized
    /// through another path counts as loaded.
    pub fn observed(&self, target_initialized: bool) -> AssociationState {
        match self.state {
            AssociationState::IdentityOnlyProxy if target_initialized => AssociationState::Loaded,
            state => state,
        }
    }

    pub(crate) fn begin_loading(&mut self) -> bool {
        if self.state == AssociationState::IdentityOnlyProxy {
            self.state = AssociationState::Loading;
            true
        } else {
            false
        }
    }

    /// Transition applied when the association is read.
    pub(crate) fn settle(&mut self, target_initialized: bool) -> AssociationState {
        self.state = match self.state {
            AssociationState::Joined => AssociationState::Loaded,
            AssociationState::IdentityOnlyProxy | AssociationState::Loading
                if target_initialized =>
            {
                AssociationState::Loaded
            }
            AssociationState::Loading => AssociationState::IdentityOnlyProxy,
            state => state,
        };
        self.state
    }
}
