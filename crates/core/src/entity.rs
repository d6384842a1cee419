//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Reservations and transfer requests are entities: their status changes over
/// time but the id stays the same, which is what entity stores key on.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Stable kind name used in errors and logs (e.g. "reservation").
    const KIND: &'static str;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
