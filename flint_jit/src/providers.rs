//! Runtime knowledge available to the optimizer.
//!
//! Passes ask a [`Providers`] implementation about memory locations and
//! callees instead of hard-coding a runtime. [`DefaultProviders`] knows
//! nothing; [`TableProviders`] is configured explicitly.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::operators::{Constant, LocationId, MethodId};
use crate::ir::stamp::Stamp;

/// Pure callee evaluated at compile time.
pub type FoldFn = fn(&[Constant]) -> Option<Constant>;

pub trait Providers: Send + Sync {
    /// The location never changes once the method runs.
    fn is_immutable(&self, _location: LocationId) -> bool {
        false
    }

    /// Declared stamp of values stored at the location.
    fn location_stamp(&self, _location: LocationId) -> Option<Stamp> {
        None
    }

    /// Result of calling `method` on constant arguments, if it is known to
    /// be pure and computable now.
    fn fold_invoke(&self, _method: MethodId, _args: &[Constant]) -> Option<Constant> {
        None
    }

    /// Calls to `method` never write memory.
    fn is_side_effect_free(&self, _method: MethodId) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProviders;

impl Providers for DefaultProviders {}

#[derive(Debug, Default, Clone)]
pub struct TableProviders {
    immutable: FxHashSet<LocationId>,
    stamps: FxHashMap<LocationId, Stamp>,
    pure: FxHashMap<MethodId, FoldFn>,
}

impl TableProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn immutable(mut self, location: LocationId) -> Self {
        self.immutable.insert(location);
        self
    }

    pub fn location(mut self, location: LocationId, stamp: Stamp) -> Self {
        self.stamps.insert(location, stamp);
        self
    }

    pub fn pure_method(mut self, method: MethodId, fold: FoldFn) -> Self {
        self.pure.insert(method, fold);
        self
    }
}

impl Providers for TableProviders {
    fn is_immutable(&self, location: LocationId) -> bool {
        self.immutable.contains(&location)
    }

    fn location_stamp(&self, location: LocationId) -> Option<Stamp> {
        self.stamps.get(&location).cloned()
    }

    fn fold_invoke(&self, method: MethodId, args: &[Constant]) -> Option<Constant> {
        self.pure.get(&method).and_then(|f| f(args))
    }

    fn is_side_effect_free(&self, method: MethodId) -> bool {
        self.pure.contains_key(&method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_one(args: &[Constant]) -> Option<Constant> {
        let x = args.first()?.as_int()?;
        Some(Constant::int_of(32, x + 1))
    }

    #[test]
    fn test_table_providers() {
        let p = TableProviders::new()
            .immutable(LocationId(1))
            .location(LocationId(2), Stamp::positive_int())
            .pure_method(MethodId(7), add_one);
        assert!(p.is_immutable(LocationId(1)));
        assert!(!p.is_immutable(LocationId(2)));
        assert_eq!(p.location_stamp(LocationId(2)), Some(Stamp::positive_int()));
        assert_eq!(p.fold_invoke(MethodId(7), &[Constant::int(41)]), Some(Constant::int(42)));
        assert!(p.is_side_effect_free(MethodId(7)));
        assert_eq!(DefaultProviders.fold_invoke(MethodId(7), &[]), None);
    }
}
