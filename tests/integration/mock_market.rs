//! Mock marketplace for integration testing.
//!
//! Provides a deterministic `MarketFeed` implementation that serves
//! configured listings and material prices, accepts purchase orders and
//! records them. Everything is in-memory and controllable from test code.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use pearl_sniper::market::MarketFeed;
use pearl_sniper::types::*;

/// A mock marketplace for deterministic testing.
pub struct MockMarket {
    listings: Arc<Mutex<HashMap<(u32, u32), Vec<Listing>>>>,
    asks: Arc<Mutex<HashMap<u64, i64>>>,
    orders: Arc<Mutex<Vec<BuyOrder>>>,
    buy_response: Arc<Mutex<BuyResponse>>,
    category_fetches: Arc<Mutex<u64>>,
    /// If set, every operation returns this error.
    force_error: Arc<Mutex<Option<MarketError>>>,
    failing_categories: Arc<Mutex<HashSet<(u32, u32)>>>,
}

impl MockMarket {
    pub fn new() -> Self {
        Self {
            listings: Arc::new(Mutex::new(HashMap::new())),
            asks: Arc::new(Mutex::new(HashMap::new())),
            orders: Arc::new(Mutex::new(Vec::new())),
            buy_response: Arc::new(Mutex::new(BuyResponse {
                result_code: 0,
                message: "Success".into(),
            })),
            category_fetches: Arc::new(Mutex::new(0)),
            force_error: Arc::new(Mutex::new(None)),
            failing_categories: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Mock with material prices from the worked example (2.5M / 20M).
    pub fn with_reference_prices() -> Self {
        let market = Self::new();
        market.set_material_prices(2_500_000, 20_000_000);
        market
    }

    pub fn set_material_prices(&self, price_a: i64, price_b: i64) {
        let mut asks = self.asks.lock().unwrap();
        asks.insert(16004, price_a);
        asks.insert(16003, price_b);
    }

    /// Replace what a category view currently shows.
    pub fn set_listings(&self, category: &Category, listings: Vec<Listing>) {
        self.listings
            .lock()
            .unwrap()
            .insert((category.main_category, category.sub_category), listings);
    }

    pub fn set_buy_response(&self, result_code: i64, message: &str) {
        *self.buy_response.lock().unwrap() = BuyResponse {
            result_code,
            message: message.to_string(),
        };
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, error: MarketError) {
        *self.force_error.lock().unwrap() = Some(error);
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Make one category view fail with a transient error.
    pub fn fail_category(&self, category: &Category) {
        self.failing_categories
            .lock()
            .unwrap()
            .insert((category.main_category, category.sub_category));
    }

    pub fn orders(&self) -> Vec<BuyOrder> {
        self.orders.lock().unwrap().clone()
    }

    pub fn category_fetches(&self) -> u64 {
        *self.category_fetches.lock().unwrap()
    }

    fn check_error(&self) -> Result<(), MarketError> {
        match self.force_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketFeed for MockMarket {
    async fn fetch_category(&self, category: &Category) -> Result<Vec<Listing>, MarketError> {
        *self.category_fetches.lock().unwrap() += 1;
        self.check_error()?;

        let key = (category.main_category, category.sub_category);
        if self.failing_categories.lock().unwrap().contains(&key) {
            return Err(MarketError::Transient(format!("{category} unavailable")));
        }
        Ok(self
            .listings
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_lowest_asks(&self, item_ids: &[u64]) -> Result<HashMap<u64, i64>, MarketError> {
        self.check_error()?;
        let asks = self.asks.lock().unwrap();
        Ok(item_ids
            .iter()
            .filter_map(|id| asks.get(id).map(|p| (*id, *p)))
            .collect())
    }

    async fn buy(&self, order: &BuyOrder) -> Result<BuyResponse, MarketError> {
        self.check_error()?;
        let response = self.buy_response.lock().unwrap().clone();
        if !response.is_success() {
            return Ok(response);
        }

        // a filled order takes units off the shelf
        let mut listings = self.listings.lock().unwrap();
        for view in listings.values_mut() {
            for listing in view.iter_mut() {
                if listing.item_key == order.item_key && listing.price_per_unit == order.price_per_unit {
                    listing.available_quantity = listing.available_quantity.saturating_sub(order.quantity);
                }
            }
            view.retain(|l| l.available_quantity > 0);
        }
        self.orders.lock().unwrap().push(order.clone());
        Ok(response)
    }

    fn name(&self) -> &str {
        "mock-market"
    }
}

/// A pearl-shop listing in `category`.
pub fn listing(category: &Category, item_key: u64, name: &str, price: i64, qty: u64) -> Listing {
    Listing {
        item_key,
        sub_key: 0,
        display_name: name.to_string(),
        price_per_unit: price,
        available_quantity: qty,
        category: category.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests for the mock itself
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn outfits() -> Category {
        Category::new(55, 1, "Male Outfits (Set)")
    }

    #[tokio::test]
    async fn test_mock_serves_listings() {
        let market = MockMarket::new();
        market.set_listings(&outfits(), vec![listing(&outfits(), 1, "A", 100, 1)]);
        let got = market.fetch_category(&outfits()).await.unwrap();
        assert_eq!(got.len(), 1);
        assert!(market
            .fetch_category(&Category::new(55, 2, "Other"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(market.category_fetches(), 2);
    }

    #[tokio::test]
    async fn test_mock_buy_takes_stock() {
        let market = MockMarket::new();
        market.set_listings(&outfits(), vec![listing(&outfits(), 1, "A", 100, 2)]);
        let order = BuyOrder {
            item_key: 1,
            sub_key: 0,
            price_per_unit: 100,
            quantity: 1,
        };
        assert!(market.buy(&order).await.unwrap().is_success());
        assert_eq!(market.fetch_category(&outfits()).await.unwrap()[0].available_quantity, 1);
        market.buy(&order).await.unwrap();
        assert!(market.fetch_category(&outfits()).await.unwrap().is_empty());
        assert_eq!(market.orders().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_partial_asks() {
        let market = MockMarket::with_reference_prices();
        let asks = market.fetch_lowest_asks(&[16004, 99]).await.unwrap();
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[&16004], 2_500_000);
    }

    #[tokio::test]
    async fn test_mock_forced_error() {
        let market = MockMarket::new();
        market.set_error(MarketError::Authentication { status: 401 });
        assert!(market.fetch_category(&outfits()).await.unwrap_err().is_auth());
        market.clear_error();
        assert!(market.fetch_category(&outfits()).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_refused_buy_records_nothing() {
        let market = MockMarket::new();
        market.set_buy_response(3, "Not enough silver");
        let order = BuyOrder {
            item_key: 1,
            sub_key: 0,
            price_per_unit: 100,
            quantity: 1,
        };
        let resp = market.buy(&order).await.unwrap();
        assert!(!resp.is_success());
        assert!(market.orders().is_empty());
    }
}
