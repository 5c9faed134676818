// SPDX-License-Identifier: MIT

pub(crate) mod fake;
