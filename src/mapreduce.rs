//! In-process map/reduce runtime: task traits, the shuffle barrier and phase runners.
//!
//! Every phase fully materializes its input groups before reducing, and each shuffle is a
//! *stable* sort by key, so values that share a key keep the order the previous phase
//! emitted them in. Parallel phases concatenate per-group output in key order, which keeps
//! a run deterministic regardless of thread scheduling.
//!
//! Reducers come in two shapes:
//!  - [`Reducer`] takes `&self` and may run across keys on the rayon pool.
//!  - [`SequentialReducer`] takes `&mut self` (it owns counters that hand out identifiers)
//!    and can only be driven by [`run_sequential`], which is a single task by construction.

use crate::progress::ProgressScope;
use anyhow::Result;
use rayon::prelude::*;

pub trait Mapper {
    type Input;
    type Key: Ord + Send;
    type Value: Send;

    fn map<F>(&self, input: Self::Input, emit: &mut F) -> Result<()>
    where
        F: FnMut(Self::Key, Self::Value);
}

/// Stateless per-key reducer; safe to run for many keys at once.
pub trait Reducer: Sync {
    type Key: Send;
    type ValueIn: Send;
    type KeyOut: Send;
    type ValueOut: Send;

    fn reduce<F>(&self, key: Self::Key, values: Vec<Self::ValueIn>, emit: &mut F) -> Result<()>
    where
        F: FnMut(Self::KeyOut, Self::ValueOut);
}

/// Reducer with cross-key state; visited strictly in shuffle order by one task.
pub trait SequentialReducer {
    type Key;
    type ValueIn;
    type KeyOut;
    type ValueOut;

    fn reduce<F>(&mut self, key: Self::Key, values: Vec<Self::ValueIn>, emit: &mut F) -> Result<()>
    where
        F: FnMut(Self::KeyOut, Self::ValueOut);
}

/// Gapless, strictly increasing identifiers in visitation order, starting at 1.
/// Owned by exactly one sequential reducer.
#[derive(Debug, Default)]
pub struct IdSequence {
    last: u64,
}

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn next_id(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    pub fn last(&self) -> u64 {
        self.last
    }
}

/// Map every input record; output pairs keep input order.
pub fn run_map<M, I>(mapper: &M, inputs: I) -> Result<Vec<(M::Key, M::Value)>>
where
    M: Mapper,
    I: IntoIterator<Item = Result<M::Input>>,
{
    let mut out = Vec::new();
    for input in inputs {
        mapper.map(input?, &mut |k, v| out.push((k, v)))?;
    }
    Ok(out)
}

/// Barrier between phases: stable-sort pairs by key, then group equal keys.
pub fn shuffle<K: Ord, V>(mut pairs: Vec<(K, V)>) -> Vec<(K, Vec<V>)> {
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let mut groups: Vec<(K, Vec<V>)> = Vec::new();
    for (k, v) in pairs {
        match groups.last_mut() {
            Some((last, values)) if *last == k => values.push(v),
            _ => groups.push((k, vec![v])),
        }
    }
    groups
}

/// Reduce independent groups on the rayon pool; output is concatenated in group order.
/// The first reducer error aborts the phase.
pub fn run_parallel<R>(
    reducer: &R,
    groups: Vec<(R::Key, Vec<R::ValueIn>)>,
    pb: Option<&ProgressScope>,
) -> Result<Vec<(R::KeyOut, R::ValueOut)>>
where
    R: Reducer,
{
    let parts: Vec<Vec<(R::KeyOut, R::ValueOut)>> = groups
        .into_par_iter()
        .map(|(key, values)| -> Result<Vec<(R::KeyOut, R::ValueOut)>> {
            let mut out = Vec::with_capacity(values.len());
            reducer.reduce(key, values, &mut |k, v| out.push((k, v)))?;
            if let Some(pb) = pb {
                pb.inc_items(1);
            }
            Ok(out)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.into_iter().flatten().collect())
}

/// Reduce all groups in order on the calling thread.
pub fn run_sequential<R>(
    reducer: &mut R,
    groups: Vec<(R::Key, Vec<R::ValueIn>)>,
    pb: Option<&ProgressScope>,
) -> Result<Vec<(R::KeyOut, R::ValueOut)>>
where
    R: SequentialReducer,
{
    let mut out = Vec::new();
    for (key, values) in groups {
        reducer.reduce(key, values, &mut |k, v| out.push((k, v)))?;
        if let Some(pb) = pb {
            pb.inc_items(1);
        }
    }
    Ok(out)
}
