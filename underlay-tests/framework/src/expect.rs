// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Comparison of observed per-resource values against expected ones.
//!
//! A check builds an expectation map once, then on every poll attempt
//! observes each resource into a map with the same keys and compares the two.
//! Resources that no longer exist observe as `None`.

use std::collections::BTreeMap;
use std::fmt::{Display, Write};
use std::time::Duration;

use ironic_client::types::{PowerState, ProvisionState};
use serde_json::Value;

use crate::wait::{Outcome, Poller, WaitError};

/// A value a check can observe, rendered the way the service spells it.
pub trait Observed {
    fn describe(&self) -> String;
}

macro_rules! observed_via_display {
    ($($ty:ty),* $(,)?) => {
        $(impl Observed for $ty {
            fn describe(&self) -> String {
                self.to_string()
            }
        })*
    };
}

observed_via_display!(
    bool,
    u8,
    String,
    &str,
    PowerState,
    ProvisionState,
    Value,
);

/// `None` is a resource that is gone or a field that is unset.
impl<T: Observed> Observed for Option<T> {
    fn describe(&self) -> String {
        match self {
            Some(v) => v.describe(),
            None => "absent".to_string(),
        }
    }
}

/// Resource identifier to expected value.
pub type ExpectationMap<K, V> = BTreeMap<K, V>;

/// Resource identifier to observed value. Always built from the same
/// resources as the matching [`ExpectationMap`].
pub type ActualMap<K, V> = BTreeMap<K, V>;

/// Expects the same `value` for every key in `keys`.
pub fn expect_all<K, V, I>(keys: I, value: V) -> ExpectationMap<K, V>
where
    K: Ord,
    V: Clone,
    I: IntoIterator<Item = K>,
{
    keys.into_iter().map(|k| (k, value.clone())).collect()
}

/// Passes iff `actual` equals `expected`. Otherwise the diagnostic lists each
/// mismatched key with its expected and actual value, followed by any keys
/// present in only one of the maps.
pub fn compare<K, V>(
    expected: &ExpectationMap<K, V>,
    actual: &ActualMap<K, V>,
) -> Outcome
where
    K: Ord + Display,
    V: PartialEq + Observed,
{
    let mut problems = Vec::new();

    for (key, want) in expected {
        match actual.get(key) {
            Some(got) if got == want => {}
            Some(got) => problems.push(format!(
                "{key}: expected {}, actual {}",
                want.describe(),
                got.describe()
            )),
            None => problems.push(format!(
                "{key}: expected {}, not observed",
                want.describe()
            )),
        }
    }
    for (key, got) in actual {
        if !expected.contains_key(key) {
            problems
                .push(format!("{key}: unexpected, actual {}", got.describe()));
        }
    }

    if problems.is_empty() {
        return Outcome::Passed;
    }

    let mut msg = format!("{} resource(s) mismatched", problems.len());
    for p in &problems {
        let _ = write!(msg, "; {p}");
    }
    Outcome::failed(msg)
}

/// Polls until `observe` yields a map equal to `expected`, or `timeout`
/// elapses. Errors from `observe` end polling immediately.
pub fn wait_for_expected<K, V, E, F>(
    poller: &Poller,
    timeout: Duration,
    expected: &ExpectationMap<K, V>,
    mut observe: F,
) -> Result<(), WaitError<E>>
where
    K: Ord + Display,
    V: PartialEq + Observed,
    F: FnMut() -> Result<ActualMap<K, V>, E>,
{
    poller.try_wait_until(timeout, || {
        let actual = observe()?;
        Ok(compare(expected, &actual))
    })
}
