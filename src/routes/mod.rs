/// Router Module Index
///
/// Splits the routing table by who may reach it. Access control is applied at
/// the module level (via Axum layers) and again inside the handlers through
/// the policy module.

/// Routes accessible to every caller, anonymous included: catalog reads and
/// the identity gateway.
pub mod public;

/// Routes behind the `AuthUser` extractor middleware. Catalog writes consult
/// the capability table in the handler.
pub mod authenticated;

/// Routes restricted to the Admin role.
pub mod admin;
