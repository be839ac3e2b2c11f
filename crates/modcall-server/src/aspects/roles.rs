//! Role-based access aspect

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use tracing::debug;

use modcall_rpc_core::RpcError;

use crate::aspect::{Aspect, Invocation};
use crate::descriptor::MethodInfo;

/// Bit-flag set of roles
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RoleGroup(u64);

impl RoleGroup {
    pub const EMPTY: RoleGroup = RoleGroup(0);
    pub const ALL: RoleGroup = RoleGroup(u64::MAX);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Group holding the single role number `index` (0-63)
    pub const fn role(index: u32) -> Self {
        Self(1 << index)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Every bit of `other` is set in `self`
    pub const fn contains(self, other: RoleGroup) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RoleGroup {
    type Output = RoleGroup;

    fn bitor(self, rhs: RoleGroup) -> RoleGroup {
        RoleGroup(self.0 | rhs.0)
    }
}

impl fmt::Debug for RoleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoleGroup({:#b})", self.0)
    }
}

/// Ordered alternatives of role groups; a caller needs one of them in full
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredRoles {
    groups: Vec<RoleGroup>,
}

impl RequiredRoles {
    /// Empty groups grant nothing and are dropped
    pub fn new(groups: impl IntoIterator<Item = RoleGroup>) -> Self {
        Self {
            groups: groups.into_iter().filter(|g| !g.is_empty()).collect(),
        }
    }

    pub fn groups(&self) -> &[RoleGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The caller holds every role of at least one group
    pub fn any_satisfied_by(&self, assigned: RoleGroup) -> bool {
        self.groups.iter().any(|group| assigned.contains(*group))
    }
}

/// Source of the roles held by a session
pub trait RoleManager: Send + Sync {
    /// Roles of the caller; `None` for an unknown session
    fn assigned_roles(&self, session_id: &str) -> Option<RoleGroup>;

    /// Grant decision. Override to replace the any-group rule.
    fn validate(&self, assigned: RoleGroup, required: &RequiredRoles) -> bool {
        required.any_satisfied_by(assigned)
    }
}

/// Guards methods declaring [`RequiredRoles`]
pub struct RoleValidator {
    manager: Arc<dyn RoleManager>,
}

impl RoleValidator {
    pub fn new(manager: Arc<dyn RoleManager>) -> Self {
        Self { manager }
    }
}

impl Aspect for RoleValidator {
    fn name(&self) -> &'static str {
        "role_validator"
    }

    fn validate(&self, info: &MethodInfo) -> Result<(), RpcError> {
        match info.required_roles() {
            Some(required) if !required.is_empty() => Ok(()),
            _ => Err(RpcError::Configuration(format!(
                "{}.{} is guarded by roles but declares no non-empty role group",
                info.module(),
                info.method()
            ))),
        }
    }

    fn before(&self, invocation: &Invocation) -> Result<(), RpcError> {
        let required = invocation.info().required_roles().ok_or_else(|| {
            RpcError::Configuration(format!("{} declares no roles", invocation.endpoint_key()))
        })?;

        let session_id = invocation
            .session_id()
            .ok_or_else(|| RpcError::Unauthenticated("no session id supplied".into()))?;
        let assigned = self
            .manager
            .assigned_roles(session_id)
            .ok_or_else(|| RpcError::Unauthenticated(format!("unknown session '{session_id}'")))?;

        if self.manager.validate(assigned, required) {
            Ok(())
        } else {
            debug!(
                endpoint = %invocation.endpoint_key(),
                session_id,
                assigned = ?assigned,
                "role check failed"
            );
            Err(RpcError::Unauthorized(format!(
                "session lacks the roles required by {}",
                invocation.endpoint_key()
            )))
        }
    }
}
