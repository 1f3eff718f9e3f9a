// ABOUTME: Registration of application handlers by channel name
// ABOUTME: Maps each channel to the factory that builds handlers for its clients
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Endpoints
//!
//! Each channel has exactly one handler type. Names are either given
//! explicitly or derived from the handler type's name in `snake_case`, and a
//! second registration of the same channel is refused. The channel set is
//! fixed once workers start: it is what every subscription connection
//! registers.

use crate::handler::{ApplicationHandler, HandlerFactory, SharedHandlerFactory};
use fanout_core::errors::{AppError, AppResult};
use fanout_core::models::Channel;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Channel to handler-factory map
#[derive(Default, Clone)]
pub struct Endpoints {
    factories: BTreeMap<Channel, SharedHandlerFactory>,
}

impl Endpoints {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under an explicit channel name
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an invalid name and `ResourceAlreadyExists`
    /// if the channel is taken
    pub fn register<F>(&mut self, name: &str, factory: F) -> AppResult<Channel>
    where
        F: HandlerFactory + 'static,
    {
        let channel = Channel::new(name)?;
        self.insert(channel, Arc::new(factory))
    }

    /// Register `H` under the `snake_case` form of its type name
    ///
    /// # Errors
    ///
    /// Returns `ResourceAlreadyExists` if the derived channel is taken
    pub fn register_type<H>(&mut self) -> AppResult<Channel>
    where
        H: ApplicationHandler + Default + 'static,
    {
        let channel = Channel::from_type_name::<H>()?;
        let factory: SharedHandlerFactory =
            Arc::new(|| Box::new(H::default()) as Box<dyn ApplicationHandler>);
        self.insert(channel, factory)
    }

    fn insert(&mut self, channel: Channel, factory: SharedHandlerFactory) -> AppResult<Channel> {
        if self.factories.contains_key(&channel) {
            return Err(AppError::already_exists(format!("Channel '{channel}'"))
                .with_details(json!({ "channel": channel.as_str() })));
        }
        info!(channel = %channel, "Registered endpoint");
        self.factories.insert(channel.clone(), factory);
        Ok(channel)
    }

    /// Every registered channel, sorted
    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.factories.keys().cloned().collect()
    }

    /// Look up a channel by name
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an invalid name and `ResourceNotFound` for
    /// an unregistered one
    pub fn resolve(&self, name: &str) -> AppResult<Channel> {
        let channel = Channel::new(name)?;
        if self.factories.contains_key(&channel) {
            Ok(channel)
        } else {
            Err(AppError::not_found(format!("Channel '{channel}'")))
        }
    }

    /// Build a handler for a client on `channel`
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if nothing is registered for `channel`
    pub fn instantiate(&self, channel: &Channel) -> AppResult<Box<dyn ApplicationHandler>> {
        self.factories
            .get(channel)
            .map(|factory| factory.create())
            .ok_or_else(|| AppError::not_found(format!("Channel '{channel}'")))
    }

    /// Number of registered channels
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
