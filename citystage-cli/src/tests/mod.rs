//! Shared test harness modules for the Citystage CLI.

use super::*;

mod probe_unit;
