// Copyright 2025 the Terrace Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runnable demos for `terrace_cascade`; see the `examples/` directory.
