//! Typed handles to declared resources.
//!
//! A [`ResourceRef`] is only handed out by the builder that declared the
//! resource. It remembers which builder that was, so passing a handle to a
//! different builder is caught as a dangling reference instead of silently
//! wiring two stacks together.

use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

use crate::resources::ResourceKind;

/// Marker for the kind of resource a handle points to.
pub trait Kind {
    const NAME: &'static str;

    fn matches(kind: &ResourceKind) -> bool;
}

/// Kinds a permission grant may target.
pub trait Grantable: Kind {
    /// Service prefix of the kind's actions, e.g. `dynamodb`.
    const SERVICE: &'static str;
}

macro_rules! resource_kind {
    ($marker:ident, $variant:ident, $name:literal) => {
        #[derive(Debug)]
        pub enum $marker {}

        impl Kind for $marker {
            const NAME: &'static str = $name;

            fn matches(kind: &ResourceKind) -> bool {
                matches!(kind, ResourceKind::$variant(_))
            }
        }
    };
}

resource_kind!(TableKind, Table, "Table");
resource_kind!(BucketKind, Bucket, "Bucket");
resource_kind!(FunctionKind, Function, "Function");
resource_kind!(RoleKind, Role, "Role");
resource_kind!(GrantKind, PermissionGrant, "PermissionGrant");
resource_kind!(UserPoolKind, UserPool, "UserPool");
resource_kind!(ClientKind, UserPoolClient, "UserPoolClient");
resource_kind!(DomainKind, UserPoolDomain, "UserPoolDomain");
resource_kind!(IdentityPoolKind, IdentityPool, "IdentityPool");
resource_kind!(AttachmentKind, RoleAttachment, "RoleAttachment");
resource_kind!(AuthorizerKind, Authorizer, "Authorizer");
resource_kind!(RestApiKind, RestApi, "RestApi");
resource_kind!(MethodKind, Method, "Method");

impl Grantable for TableKind {
    const SERVICE: &'static str = "dynamodb";
}

impl Grantable for BucketKind {
    const SERVICE: &'static str = "s3";
}

/// Opaque handle to a declared resource.
pub struct ResourceRef<K> {
    owner: Ulid,
    logical_id: String,
    physical_id: String,
    arn: String,
    kind: PhantomData<fn() -> K>,
}

impl<K: Kind> ResourceRef<K> {
    pub(crate) fn new(owner: Ulid, logical_id: &str, physical_id: &str, arn: &str) -> Self {
        Self {
            owner,
            logical_id: logical_id.to_string(),
            physical_id: physical_id.to_string(),
            arn: arn.to_string(),
            kind: PhantomData,
        }
    }

    pub(crate) fn owner(&self) -> Ulid {
        self.owner
    }

    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Name or id assigned when the resource was realized.
    pub fn physical_id(&self) -> &str {
        &self.physical_id
    }

    pub fn arn(&self) -> &str {
        &self.arn
    }

    pub fn kind_name(&self) -> &'static str {
        K::NAME
    }
}

impl<K> Clone for ResourceRef<K> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner,
            logical_id: self.logical_id.clone(),
            physical_id: self.physical_id.clone(),
            arn: self.arn.clone(),
            kind: PhantomData,
        }
    }
}

impl<K> PartialEq for ResourceRef<K> {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.logical_id == other.logical_id
    }
}

impl<K> Eq for ResourceRef<K> {}

impl<K: Kind> fmt::Debug for ResourceRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRef")
            .field("kind", &K::NAME)
            .field("logical_id", &self.logical_id)
            .field("arn", &self.arn)
            .finish()
    }
}

impl<K: Kind> fmt::Display for ResourceRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", K::NAME, self.logical_id)
    }
}

pub type TableRef = ResourceRef<TableKind>;
pub type BucketRef = ResourceRef<BucketKind>;
pub type FunctionRef = ResourceRef<FunctionKind>;
pub type RoleRef = ResourceRef<RoleKind>;
pub type GrantRef = ResourceRef<GrantKind>;
pub type UserPoolRef = ResourceRef<UserPoolKind>;
pub type ClientRef = ResourceRef<ClientKind>;
pub type DomainRef = ResourceRef<DomainKind>;
pub type IdentityPoolRef = ResourceRef<IdentityPoolKind>;
pub type AttachmentRef = ResourceRef<AttachmentKind>;
pub type AuthorizerRef = ResourceRef<AuthorizerKind>;
pub type RestApiRef = ResourceRef<RestApiKind>;
pub type MethodRef = ResourceRef<MethodKind>;
