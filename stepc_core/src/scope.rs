//! The lexical scope tree of a method.
//!
//! Scopes mirror the block structure of the method body:
//! each scope owns the locals declared directly within it and references its enclosing scope.
//! The method scope ([`ScopeTree::METHOD`]) is the root and owns the method-level locals.
//!
//! The tree is created once while splitting, and it is read-only thereafter.
//!
//! ```
//! # use stepc_core::program::{Span, Type};
//! # use stepc_core::scope::ScopeTree;
//! let mut scopes = ScopeTree::new();
//! let outer = scopes.new_scope(ScopeTree::METHOD)?;
//! let inner = scopes.new_scope(outer)?;
//! let x = scopes.new_local(outer, "x", Type::Int, Span::default())?;
//!
//! // Locals are visible from nested scopes.
//! assert_eq!(scopes.lookup(inner, "x"), Some(x));
//! // Moving outward exits scopes, moving inward does not.
//! assert_eq!(scopes.exited(inner, ScopeTree::METHOD).as_slice(), &[inner, outer]);
//! assert!(scopes.exited(ScopeTree::METHOD, inner).is_empty());
//! # Ok::<(), stepc_core::LowerError>(())
//! ```

use crate::error::{LowerError, narrow};
use crate::program::{Ident, Span, Type};
use serde::Serialize;
use smallvec::SmallVec;

/// An indexing object for scopes.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ScopeId(u16);

impl ScopeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An indexing object for locals, unique across the whole method.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct LocalId(u16);

impl LocalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalInfo {
    pub name: Ident,
    pub ty: Type,
    pub scope: ScopeId,
    #[serde(skip)]
    pub span: Span,
}

#[derive(Debug, Clone)]
struct Scope {
    parent: Option<ScopeId>,
    locals: Vec<LocalId>,
}

#[derive(Debug, Clone)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    locals: Vec<LocalInfo>,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTree {
    /// The method-level scope, root of the tree.
    pub const METHOD: ScopeId = ScopeId(0);

    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                parent: None,
                locals: Vec::new(),
            }],
            locals: Vec::new(),
        }
    }

    pub fn new_scope(&mut self, parent: ScopeId) -> Result<ScopeId, LowerError> {
        let id = ScopeId(narrow(self.scopes.len(), "scopes")?);
        self.scopes.push(Scope {
            parent: Some(parent),
            locals: Vec::new(),
        });
        Ok(id)
    }

    pub fn new_local(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: Type,
        span: Span,
    ) -> Result<LocalId, LowerError> {
        let id = LocalId(narrow(self.locals.len(), "locals")?);
        self.locals.push(LocalInfo {
            name: name.to_owned(),
            ty,
            scope,
            span,
        });
        self.scopes[scope.index()].locals.push(id);
        Ok(id)
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope.index()].parent
    }

    /// Locals owned by the scope, in declaration order.
    pub fn owned(&self, scope: ScopeId) -> &[LocalId] {
        &self.scopes[scope.index()].locals
    }

    pub fn local(&self, local: LocalId) -> &LocalInfo {
        &self.locals[local.index()]
    }

    pub fn locals(&self) -> impl Iterator<Item = (LocalId, &LocalInfo)> {
        self.locals
            .iter()
            .enumerate()
            .map(|(idx, info)| (LocalId(idx as u16), info))
    }

    pub fn scopes(&self) -> impl Iterator<Item = ScopeId> {
        (0..self.scopes.len()).map(|idx| ScopeId(idx as u16))
    }

    /// Resolves a name from the given scope outward.
    /// Within a scope, later declarations shadow earlier ones.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<LocalId> {
        let mut current = Some(scope);
        while let Some(scope) = current {
            let found = self.scopes[scope.index()]
                .locals
                .iter()
                .rev()
                .find(|local| self.locals[local.index()].name == name);
            if found.is_some() {
                return found.copied();
            }
            current = self.parent(scope);
        }
        None
    }

    /// Whether `ancestor` is `scope` itself or encloses it.
    pub fn encloses(&self, ancestor: ScopeId, scope: ScopeId) -> bool {
        let mut current = Some(scope);
        while let Some(scope) = current {
            if scope == ancestor {
                return true;
            }
            current = self.parent(scope);
        }
        false
    }

    /// The scopes exited by a control transfer from `from` to `to`, innermost first.
    ///
    /// Walks the chain of `from` toward the method scope until it meets a scope enclosing `to`.
    /// Inward and same-scope transfers exit nothing.
    pub fn exited(&self, from: ScopeId, to: ScopeId) -> SmallVec<[ScopeId; 4]> {
        let mut exited = SmallVec::new();
        let mut current = Some(from);
        while let Some(scope) = current {
            if self.encloses(scope, to) {
                break;
            }
            exited.push(scope);
            current = self.parent(scope);
        }
        exited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadowing() -> Result<(), LowerError> {
        let mut scopes = ScopeTree::new();
        let inner = scopes.new_scope(ScopeTree::METHOD)?;
        let outer_x = scopes.new_local(ScopeTree::METHOD, "x", Type::Int, Span::default())?;
        let inner_x = scopes.new_local(inner, "x", Type::Bool, Span::default())?;
        assert_eq!(scopes.lookup(inner, "x"), Some(inner_x));
        assert_eq!(scopes.lookup(ScopeTree::METHOD, "x"), Some(outer_x));
        assert_eq!(scopes.lookup(inner, "y"), None);
        assert_eq!(scopes.local(inner_x).scope, inner);
        Ok(())
    }

    #[test]
    fn sideways_exits_up_to_common_ancestor() -> Result<(), LowerError> {
        let mut scopes = ScopeTree::new();
        let a = scopes.new_scope(ScopeTree::METHOD)?;
        let a1 = scopes.new_scope(a)?;
        let b = scopes.new_scope(ScopeTree::METHOD)?;
        assert_eq!(scopes.exited(a1, b).as_slice(), &[a1, a]);
        assert_eq!(scopes.exited(a1, a).as_slice(), &[a1]);
        assert!(scopes.exited(a, a).is_empty());
        assert!(scopes.exited(a, a1).is_empty());
        Ok(())
    }

    #[test]
    fn local_slots_are_bounded() -> Result<(), LowerError> {
        let mut scopes = ScopeTree::new();
        for idx in 0..=u16::MAX {
            scopes.new_local(ScopeTree::METHOD, &format!("v{idx}"), Type::Bool, Span::default())?;
        }
        assert_eq!(
            scopes.new_local(ScopeTree::METHOD, "one_more", Type::Bool, Span::default()),
            Err(LowerError::CapacityExceeded("locals"))
        );
        Ok(())
    }
}
