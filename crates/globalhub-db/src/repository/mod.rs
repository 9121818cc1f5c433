//! # Repository Module
//!
//! Database repositories for the manager.
//!
//! ## Transaction Boundaries
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Repositories never open transactions themselves.                       │
//! │                                                                         │
//! │  Write methods take any `sqlx::Executor`, so a handler decides the      │
//! │  unit of work:                                                          │
//! │                                                                         │
//! │    let mut tx = db.begin().await?;                                      │
//! │    repo.upsert(&mut *tx, …).await?;      ← inside the transaction       │
//! │    repo.soft_delete(&mut *tx, …).await?;                                │
//! │    tx.commit().await?;                                                  │
//! │                                                                         │
//! │    repo.list("hub1").await?;             ← reads go to the pool         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod compliance;
pub mod event;
pub mod generic;
pub mod leaf_hub;
pub mod retention;
