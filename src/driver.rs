// Copyright 2019 Matthieu Felix
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The driver — a fixed-point worklist over `step`.
//!
//! Generalizes a single program counter stepping forward until it
//! halts into a worklist over *many* live configurations: under
//! abstraction a configuration can have several sound successors (the
//! store is a join lattice, so one address can hold several storables
//! at once), so the driver has to explore a graph rather than follow a
//! single thread.
//!
//! Termination: the concrete allocator always produces fresh
//! addresses, so the same `Configuration` is never visited twice and
//! the worklist drains naturally once the program halts or aborts. A
//! finite address domain (`KCFAAlloc` with any `k`) makes the state
//! space finite too, so the visited set is what actually guarantees
//! termination there, even for programs that diverge concretely.

use std::collections::VecDeque;

use log::{trace, warn};

use crate::alloc::AllocPolicy;
use crate::machine::{step, AbortReason, Configuration, Outcome};
use crate::store::Storable;

/// Explores every configuration reachable from `initial`, returning
/// the terminal outcomes (`Done`/`Abort`) encountered along the way.
/// `bound`, when given, caps the number of distinct configurations
/// visited — the abstract machine's state space is finite but can
/// still be large, and a caller exploring untrusted input wants a
/// way to stop rather than run forever.
pub fn reachable(initial: Configuration, policy: &dyn AllocPolicy, bound: Option<usize>) -> Vec<Outcome> {
    let mut worklist: VecDeque<Configuration> = VecDeque::new();
    worklist.push_back(initial);

    // Linear-scan visited set: `Configuration` embeds `Environment`
    // (a plain `HashMap`), which has no `Hash` impl, so membership is
    // tested with `PartialEq` the same way `Store`'s per-address sets
    // are — see store.rs.
    let mut visited: Vec<Configuration> = Vec::new();
    let mut terminal: Vec<Outcome> = Vec::new();

    while let Some(cfg) = worklist.pop_front() {
        if visited.iter().any(|v| v == &cfg) {
            continue;
        }
        if let Some(b) = bound {
            if visited.len() >= b {
                warn!("reachable: bound of {} configurations reached, stopping early", b);
                break;
            }
        }
        visited.push(cfg.clone());

        let konts = cfg.store.lookup(cfg.kont_addr);
        if konts.is_empty() {
            terminal.push(Outcome::Abort(AbortReason::TypeError(format!(
                "continuation address {:?} was never written",
                cfg.kont_addr
            ))));
            continue;
        }

        for storable in konts.iter() {
            let k = match storable {
                Storable::StoredKont(k) => k,
                Storable::StoredValue(_, _) => {
                    terminal.push(Outcome::Abort(AbortReason::NonValueStorable(cfg.kont_addr)));
                    continue;
                }
            };
            for outcome in step(&cfg, k, policy) {
                trace!("reachable: {:?}", outcome);
                match outcome {
                    Outcome::Next(next) => worklist.push_back(next),
                    terminal_outcome => terminal.push(terminal_outcome),
                }
            }
        }
    }

    terminal
}
