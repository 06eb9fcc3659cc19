//! Registry of tracked orders, one coordinator task each

use super::engine::{stopped, Command, CoordinatorContext, OrderCoordinator, OrderHandle, OrderView};
use crate::error::{CoordinatorError, CoordinatorResult};

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::info;

/// Tracks many orders concurrently
pub struct SwapCoordinator {
    ctx: CoordinatorContext,
    orders: DashMap<String, OrderHandle>,
}

impl SwapCoordinator {
    pub fn new(ctx: CoordinatorContext) -> Self {
        Self {
            ctx,
            orders: DashMap::new(),
        }
    }

    /// Start tracking an order; tracking an already tracked order is a no-op
    pub fn track(&self, order_id: &str) -> CoordinatorResult<OrderView> {
        let order_id = order_id.trim();
        if order_id.is_empty() {
            return Err(CoordinatorError::MissingRequiredField {
                field: "order_id".to_string(),
            });
        }

        let view = self
            .orders
            .entry(order_id.to_string())
            .or_insert_with(|| OrderCoordinator::spawn(order_id, self.ctx.clone()))
            .view();

        crate::metrics::set_orders_tracked(self.orders.len());
        Ok(view)
    }

    /// Stop tracking an order and wait for its coordinator to finish
    pub async fn untrack(&self, order_id: &str) -> CoordinatorResult<()> {
        let (_, handle) = self
            .orders
            .remove(order_id)
            .ok_or_else(|| CoordinatorError::NotFound {
                order_id: order_id.to_string(),
            })?;

        handle.shutdown().await;
        crate::metrics::set_orders_tracked(self.orders.len());
        info!("Untracked order {}", order_id);
        Ok(())
    }

    pub fn view(&self, order_id: &str) -> Option<OrderView> {
        self.orders.get(order_id).map(|handle| handle.view())
    }

    pub fn subscribe(&self, order_id: &str) -> Option<watch::Receiver<OrderView>> {
        self.orders.get(order_id).map(|handle| handle.subscribe())
    }

    /// Views of every tracked order, sorted by order ID
    pub fn list(&self) -> Vec<OrderView> {
        let mut views: Vec<OrderView> = self.orders.iter().map(|entry| entry.view()).collect();
        views.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        views
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    async fn send(&self, order_id: &str, command: Command) -> CoordinatorResult<()> {
        // Clone the sender so no map guard is held across the await
        let commands = self
            .orders
            .get(order_id)
            .map(|handle| handle.commands())
            .ok_or_else(|| CoordinatorError::NotFound {
                order_id: order_id.to_string(),
            })?;

        commands.send(command).await.map_err(|_| stopped(order_id))
    }

    /// Fetch a fresh snapshot immediately
    pub async fn refresh(&self, order_id: &str) -> CoordinatorResult<()> {
        self.send(order_id, Command::Refresh).await
    }

    pub async fn retry_secret(&self, order_id: &str) -> CoordinatorResult<()> {
        self.send(order_id, Command::RetrySecret).await
    }

    pub async fn retry_redeem(&self, order_id: &str) -> CoordinatorResult<()> {
        self.send(order_id, Command::RetryRedeem).await
    }

    /// Stop every coordinator
    pub async fn shutdown_all(&self) {
        let order_ids: Vec<String> = self.orders.iter().map(|e| e.key().clone()).collect();
        let handles: Vec<OrderHandle> = order_ids
            .iter()
            .filter_map(|id| self.orders.remove(id).map(|(_, handle)| handle))
            .collect();

        info!("Stopping {} order coordinators", handles.len());
        join_all(handles.into_iter().map(OrderHandle::shutdown)).await;
        crate::metrics::set_orders_tracked(0);
    }
}
