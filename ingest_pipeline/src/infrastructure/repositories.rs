// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Persistence adapters implementing the domain repository ports.

pub mod sqlite_repository;

pub use sqlite_repository::SqliteRepository;
