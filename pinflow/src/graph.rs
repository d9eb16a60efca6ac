// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! A minimal host driver that owns a set of filters and serializes their
//! state changes.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    FormatDescriptor, Result,
    filter::{Filter, FilterImpl, FilterState},
    pin::PinId,
};

/// State control shared by every filter regardless of its implementation.
pub trait Control: Send + Sync {
    fn name(&self) -> &str;
    fn pause(&self) -> Result<()>;
    fn run(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn state(&self) -> Result<FilterState>;
}

impl<T: FilterImpl> Control for Filter<T> {
    fn name(&self) -> &str {
        Filter::name(self)
    }

    fn pause(&self) -> Result<()> {
        Filter::pause(self)
    }

    fn run(&self) -> Result<()> {
        Filter::run(self)
    }

    fn stop(&self) -> Result<()> {
        Filter::stop(self)
    }

    fn state(&self) -> Result<FilterState> {
        Filter::state(self)
    }
}

/// Filters in upstream-to-downstream insertion order.
///
/// State changes are applied sink first, so every consumer is active before
/// its producer starts pushing and stopped before its producer's pool is
/// decommitted. Dropping the graph stops it.
#[derive(Default)]
pub struct Graph {
    filters: Vec<Arc<dyn Control>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter. Add sources first and sinks last.
    pub fn add<T: FilterImpl>(&mut self, filter: &Filter<T>) {
        self.filters.push(Arc::new(filter.clone()));
    }

    /// Connects output `output` of `upstream` to input `input` of
    /// `downstream`.
    pub fn connect<U: FilterImpl, D: FilterImpl>(
        &self,
        upstream: &Filter<U>,
        output: PinId,
        downstream: &Filter<D>,
        input: PinId,
        proposed: Option<&FormatDescriptor>,
    ) -> Result<FormatDescriptor> {
        let format = upstream.connect(output, downstream.input(input)?, proposed)?;
        info!(
            "Connected {}:{} -> {}:{} as {:?}",
            upstream.name(),
            output,
            downstream.name(),
            input,
            format.subtype
        );
        Ok(format)
    }

    pub fn pause(&self) -> Result<()> {
        self.filters.iter().rev().try_for_each(|f| f.pause())
    }

    pub fn run(&self) -> Result<()> {
        self.filters.iter().rev().try_for_each(|f| f.run())
    }

    /// Stops every filter, even after a failure; returns the first error.
    pub fn stop(&self) -> Result<()> {
        let mut result = Ok(());
        for filter in self.filters.iter().rev() {
            if let Err(err) = filter.stop() {
                warn!("Failed to stop {}: {}", filter.name(), err);
                result = result.and(Err(err));
            }
        }
        result
    }

    /// States of all filters, in insertion order.
    pub fn states(&self) -> Result<Vec<(String, FilterState)>> {
        self.filters
            .iter()
            .map(|f| Ok((f.name().to_string(), f.state()?)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("Graph teardown: {}", err);
        }
    }
}
