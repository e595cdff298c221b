//! Model binding fixtures
//!
//! [`BindingGuard`] points a set of models at a database and puts their
//! previous bindings back when dropped. [`requires_models`] wraps a test body
//! with a binding plus a fresh schema for those models.

use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::warn;

use crate::db::Database;
use crate::error::Result;
use crate::model::ModelMeta;

/// Restores every rebound model to its prior database when dropped
#[must_use = "bindings are restored as soon as the guard is dropped"]
pub struct BindingGuard {
    saved: Vec<(&'static ModelMeta, Option<Arc<Database>>)>,
}

impl BindingGuard {
    /// Bind each model to `database`, remembering its current binding
    pub fn bind(models: &[&'static ModelMeta], database: &Arc<Database>) -> Self {
        let saved = models
            .iter()
            .map(|model| (*model, model.set_database(Some(database.clone()))))
            .collect();
        Self { saved }
    }

    pub fn models(&self) -> impl Iterator<Item = &'static ModelMeta> + '_ {
        self.saved.iter().map(|(model, _)| *model)
    }
}

impl Drop for BindingGuard {
    fn drop(&mut self) {
        // Reverse order so a model listed twice ends on its original binding.
        for (model, previous) in self.saved.drain(..).rev() {
            model.set_database(previous);
        }
    }
}

/// Run `body` with `models` bound to `database` on freshly created tables
///
/// Before the body: bind, safe-drop, create. After the body, whether it
/// returned or panicked: drop the tables, then restore the bindings. A panic
/// in the body is resumed after cleanup; a returned value is passed through
/// untouched, `Err` included.
pub async fn requires_models<F, Fut, T>(
    database: &Arc<Database>,
    models: &[&'static ModelMeta],
    body: F,
) -> Result<T>
where
    F: FnOnce(Arc<Database>) -> Fut,
    Fut: Future<Output = T>,
{
    let bindings = BindingGuard::bind(models, database);
    database.drop_tables(models, true).await?;
    database.create_tables(models).await?;

    let handle = database.clone();
    let outcome = AssertUnwindSafe(async move { body(handle).await })
        .catch_unwind()
        .await;

    let cleanup = database.drop_tables(models, true).await;
    drop(bindings);

    match outcome {
        Ok(value) => {
            cleanup?;
            Ok(value)
        }
        Err(panic) => {
            if let Err(e) = cleanup {
                warn!(error = %e, "dropping tables after a failed test body");
            }
            resume_unwind(panic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::connected_memory_db;
    use crate::db::{in_memory_db, ConnectParams};
    use crate::model::{Field, Model};

    crate::model! {
        struct Gadget => "gadget" {
            Field::auto("id"),
            Field::text("label"),
        }
    }

    crate::model! {
        struct Sprocket => "sprocket" {
            Field::auto("id"),
        }
    }

    crate::model! {
        struct Widget => "widget" {
            Field::auto("id"),
            Field::foreign_key("gadget_id", "gadget"),
        }
    }

    #[test]
    fn test_binding_guard_restores_previous() {
        let original = Arc::new(in_memory_db(ConnectParams::default()));
        let test_db = Arc::new(in_memory_db(ConnectParams::default()));
        Sprocket::meta().set_database(Some(original.clone()));

        {
            let guard = BindingGuard::bind(&[Sprocket::meta(), Sprocket::meta()], &test_db);
            assert_eq!(guard.models().count(), 2);
            assert!(Sprocket::meta().is_bound_to(&test_db));
        }

        assert!(Sprocket::meta().is_bound_to(&original));
        Sprocket::meta().set_database(None);
    }

    #[tokio::test]
    async fn test_requires_models_lifecycle() {
        let db = Arc::new(connected_memory_db().await);
        let models = [Widget::meta(), Gadget::meta()];

        let count = requires_models(&db, &models, |db| async move {
            assert!(Gadget::meta().is_bound_to(&db));
            assert!(db.table_exists("widget").await.unwrap());
            Gadget::meta()
                .execute(&Gadget::meta().insert().row(["a"]))
                .await
                .unwrap();
            Gadget::meta().count().await.unwrap()
        })
        .await
        .unwrap();

        assert_eq!(count, 1);
        assert!(Gadget::meta().database().is_none());
        assert!(Widget::meta().database().is_none());
        assert!(db.get_tables().await.unwrap().is_empty());
    }
}
