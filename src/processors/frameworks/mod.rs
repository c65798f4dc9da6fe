// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Client-protocol integrations.

pub mod rtvi;

pub use rtvi::{RTVIConfig, RTVIHandle, RTVIMessage, RTVIObserver, RTVIObserverParams, RTVIProcessor};
