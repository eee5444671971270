use chrono::{DateTime, Utc};
use common::{BrandId, CategoryId, Money, ProductId};
use serde::{Deserialize, Serialize};

/// A catalog product as seen by the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub price: Money,
    pub stock: u32,
    pub is_available: bool,
    pub available_sizes: Vec<String>,
    pub available_colors: Vec<String>,
    pub category_id: CategoryId,
    pub brand_id: Option<BrandId>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Returns true if the product can be ordered in the given quantity right now.
    pub fn can_fulfill(&self, quantity: u32) -> bool {
        self.is_available && self.stock >= quantity
    }
}

/// Input for seeding a product into a store.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
    pub price: Money,
    pub stock: u32,
    pub is_available: bool,
    pub available_sizes: Vec<String>,
    pub available_colors: Vec<String>,
    pub category_id: CategoryId,
    pub brand_id: Option<BrandId>,
}

impl NewProduct {
    /// Creates an available product with no sizes, colors or brand.
    pub fn new(name: impl Into<String>, price: Money, stock: u32, category_id: CategoryId) -> Self {
        Self {
            name: name.into(),
            description: None,
            price,
            stock,
            is_available: true,
            available_sizes: Vec::new(),
            available_colors: Vec::new(),
            category_id,
            brand_id: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn brand(mut self, brand_id: BrandId) -> Self {
        self.brand_id = Some(brand_id);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.is_available = false;
        self
    }

    pub fn sizes(mut self, sizes: &[&str]) -> Self {
        self.available_sizes = sizes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn colors(mut self, colors: &[&str]) -> Self {
        self.available_colors = colors.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Builds the product record with a fresh id.
    pub fn into_product(self, created_at: DateTime<Utc>) -> Product {
        Product {
            id: ProductId::new(),
            name: self.name,
            description: self.description,
            price: self.price,
            stock: self.stock,
            is_available: self.is_available,
            available_sizes: self.available_sizes,
            available_colors: self.available_colors,
            category_id: self.category_id,
            brand_id: self.brand_id,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brand {
    pub id: BrandId,
    pub name: String,
    pub description: Option<String>,
    pub logo_url: Option<String>,
}
