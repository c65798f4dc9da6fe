// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Shared utilities.

pub mod base_object;
pub mod helpers;
