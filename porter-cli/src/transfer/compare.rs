//! Three-way reconciliation of two entity collections
//!
//! Elements are matched by identity, never by value. Every source element
//! triggers exactly one of create or update; every destination element without
//! a source counterpart triggers delete.

use std::collections::HashMap;

use super::types::{EntityId, Identified};

type CreateFn<'f, S, T, E> = Box<dyn FnMut(&mut T, &S) -> Result<(), E> + 'f>;
type UpdateFn<'f, S, D, T, E> = Box<dyn FnMut(&mut T, &S, &D) -> Result<(), E> + 'f>;
type DeleteFn<'f, D, T, E> = Box<dyn FnMut(&mut T, &D) -> Result<(), E> + 'f>;

/// Configured comparison of a source and a destination collection
///
/// Callbacks receive a caller-owned state `T`. [`CollectionCompare::compare`]
/// consumes the comparison, so one configuration drives one run.
pub struct CollectionCompare<'f, S, D, T, E> {
    on_create: Option<CreateFn<'f, S, T, E>>,
    on_update: Option<UpdateFn<'f, S, D, T, E>>,
    on_delete: Option<DeleteFn<'f, D, T, E>>,
}

impl<'f, S, D, T, E> Default for CollectionCompare<'f, S, D, T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'f, S, D, T, E> CollectionCompare<'f, S, D, T, E> {
    pub fn new() -> Self {
        CollectionCompare {
            on_create: None,
            on_update: None,
            on_delete: None,
        }
    }

    pub fn on_create(mut self, f: impl FnMut(&mut T, &S) -> Result<(), E> + 'f) -> Self {
        self.on_create = Some(Box::new(f));
        self
    }

    pub fn on_update(mut self, f: impl FnMut(&mut T, &S, &D) -> Result<(), E> + 'f) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    pub fn on_delete(mut self, f: impl FnMut(&mut T, &D) -> Result<(), E> + 'f) -> Self {
        self.on_delete = Some(Box::new(f));
        self
    }
}

impl<'f, S, D, T, E> CollectionCompare<'f, S, D, T, E>
where
    S: Identified,
    D: Identified,
{
    /// Run the comparison; absent collections count as empty
    ///
    /// Stops at the first callback error and returns it.
    pub fn compare(mut self, src: Option<&[S]>, dst: Option<&[D]>, state: &mut T) -> Result<(), E> {
        let src = src.unwrap_or(&[]);
        let dst = dst.unwrap_or(&[]);

        let dst_index: HashMap<&EntityId, usize> = dst
            .iter()
            .enumerate()
            .map(|(idx, d)| (d.identity(), idx))
            .collect();
        let mut matched = vec![false; dst.len()];

        for s in src {
            match dst_index.get(s.identity()) {
                Some(&idx) => {
                    matched[idx] = true;
                    if let Some(f) = self.on_update.as_mut() {
                        f(state, s, &dst[idx])?;
                    }
                }
                None => {
                    if let Some(f) = self.on_create.as_mut() {
                        f(state, s)?;
                    }
                }
            }
        }

        for (d, was_matched) in dst.iter().zip(matched) {
            if was_matched {
                continue;
            }
            if let Some(f) = self.on_delete.as_mut() {
                f(state, d)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{Entity, EntityKey};

    #[derive(Default)]
    struct Calls {
        created: Vec<String>,
        updated: Vec<(String, String)>,
        deleted: Vec<String>,
    }

    fn make_entities(ids: &[&str]) -> Vec<Entity> {
        ids.iter().map(|id| Entity::detached("Child", *id)).collect()
    }

    fn run(src: Option<&[Entity]>, dst: Option<&[Entity]>) -> Calls {
        let mut calls = Calls::default();
        CollectionCompare::<Entity, Entity, Calls, ()>::new()
            .on_create(|c, s| {
                c.created.push(s.id().to_string());
                Ok(())
            })
            .on_update(|c, s, d| {
                c.updated.push((s.id().to_string(), d.id().to_string()));
                Ok(())
            })
            .on_delete(|c, d| {
                c.deleted.push(d.id().to_string());
                Ok(())
            })
            .compare(src, dst, &mut calls)
            .unwrap();
        calls
    }

    #[test]
    fn test_create_update_delete_counts() {
        let src = make_entities(&["a", "b", "c"]);
        let dst = make_entities(&["b", "d", "e"]);
        let calls = run(Some(&src), Some(&dst));

        assert_eq!(calls.created, vec!["a", "c"]);
        assert_eq!(calls.updated, vec![("b".to_string(), "b".to_string())]);
        assert_eq!(calls.deleted, vec!["d", "e"]);
        assert_eq!(calls.created.len() + calls.updated.len(), src.len());
    }

    #[test]
    fn test_absent_collections() {
        let items = make_entities(&["a", "b"]);

        let calls = run(None, None);
        assert!(calls.created.is_empty() && calls.updated.is_empty() && calls.deleted.is_empty());

        let calls = run(None, Some(&items));
        assert!(calls.created.is_empty() && calls.updated.is_empty());
        assert_eq!(calls.deleted, vec!["a", "b"]);

        let calls = run(Some(&items), None);
        assert_eq!(calls.created, vec!["a", "b"]);
        assert!(calls.updated.is_empty() && calls.deleted.is_empty());
    }

    #[test]
    fn test_matches_by_identity_not_value() {
        let src = vec![Entity::detached("Child", "a").with("title", crate::transfer::Value::String("new".into()))];
        let dst = vec![Entity::new("Child", "a")];
        let calls = run(Some(&src), Some(&dst));
        assert_eq!(calls.updated.len(), 1);
        assert!(calls.created.is_empty() && calls.deleted.is_empty());
    }

    #[test]
    fn test_mixed_element_types() {
        let src = make_entities(&["a"]);
        let dst = vec![EntityKey::new("Child", "a"), EntityKey::new("Child", "z")];
        let mut deleted = Vec::new();
        CollectionCompare::<Entity, EntityKey, Vec<String>, ()>::new()
            .on_delete(|acc, d| {
                acc.push(d.id.to_string());
                Ok(())
            })
            .compare(Some(&src), Some(&dst), &mut deleted)
            .unwrap();
        assert_eq!(deleted, vec!["z"]);
    }

    #[test]
    fn test_first_error_stops() {
        let src = make_entities(&["a", "b"]);
        let mut seen = 0;
        let result = CollectionCompare::<Entity, Entity, i32, String>::new()
            .on_create(|n, s| {
                *n += 1;
                Err(format!("boom {}", s.id()))
            })
            .compare(Some(&src), None, &mut seen);
        assert_eq!(result, Err("boom a".to_string()));
        assert_eq!(seen, 1);
    }
}
