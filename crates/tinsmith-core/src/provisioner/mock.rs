// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock provisioner for testing.
//!
//! Records every statement it is asked to execute, and can be told to fail
//! or hang on particular statement kinds.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Provisioner;
use crate::ddl::{Ddl, DdlKind};
use crate::error::{Error, Result};

/// Mock provisioner that executes nothing.
#[derive(Default)]
pub struct MockProvisioner {
    executed: Mutex<Vec<Ddl>>,
    failing: Mutex<HashSet<DdlKind>>,
    hanging: Mutex<HashSet<DdlKind>>,
}

impl MockProvisioner {
    /// Create a provisioner where every statement succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail subsequent statements of `kind`.
    pub async fn fail(&self, kind: DdlKind) {
        self.failing.lock().await.insert(kind);
    }

    /// Stop failing statements of `kind`.
    pub async fn recover(&self, kind: DdlKind) {
        self.failing.lock().await.remove(&kind);
    }

    /// Never complete statements of `kind`.
    pub async fn hang(&self, kind: DdlKind) {
        self.hanging.lock().await.insert(kind);
    }

    /// Every statement attempted so far, in order.
    pub async fn statements(&self) -> Vec<Ddl> {
        self.executed.lock().await.clone()
    }

    /// Attempted statements of one kind.
    pub async fn statements_of(&self, kind: DdlKind) -> Vec<Ddl> {
        self.executed
            .lock()
            .await
            .iter()
            .filter(|s| s.kind() == kind)
            .cloned()
            .collect()
    }

    /// Forget recorded statements.
    pub async fn clear(&self) {
        self.executed.lock().await.clear();
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn execute(&self, statement: &Ddl) -> Result<()> {
        self.executed.lock().await.push(statement.clone());

        let kind = statement.kind();
        if self.hanging.lock().await.contains(&kind) {
            std::future::pending::<()>().await;
        }
        if self.failing.lock().await.contains(&kind) {
            return Err(Error::Ddl {
                kind,
                source: sqlx::Error::Protocol(format!("mock failure: {}", kind)),
            });
        }
        Ok(())
    }
}
