// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Wire-level helpers shared by the HTTP providers.

pub mod llm_protocol;
pub mod sse;
