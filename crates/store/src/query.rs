use common::{BrandId, CategoryId};
use serde::{Deserialize, Serialize};

use crate::model::Product;

/// Default number of products per catalog page.
pub const DEFAULT_PAGE_SIZE: u32 = 12;

/// Largest page a caller may ask for.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Ordering of a catalog listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    PriceAsc,
    PriceDesc,
    #[default]
    Name,
    Newest,
}

impl ProductSort {
    /// Parses a sort parameter, falling back to name order for unknown values.
    pub fn from_param(param: &str) -> Self {
        match param {
            "price_asc" => ProductSort::PriceAsc,
            "price_desc" => ProductSort::PriceDesc,
            "newest" => ProductSort::Newest,
            _ => ProductSort::Name,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductSort::PriceAsc => "price_asc",
            ProductSort::PriceDesc => "price_desc",
            ProductSort::Name => "name",
            ProductSort::Newest => "newest",
        }
    }
}

/// Builder for catalog listing queries.
///
/// Listings only ever contain available products. Filters combine with AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductQuery {
    pub category_id: Option<CategoryId>,
    pub brand_id: Option<BrandId>,
    /// Case-insensitive substring matched against name and description.
    pub search: Option<String>,
    pub sort: ProductSort,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            category_id: None,
            brand_id: None,
            search: None,
            sort: ProductSort::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ProductQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn brand(mut self, brand_id: BrandId) -> Self {
        self.brand_id = Some(brand_id);
        self
    }

    /// Sets the search text. Blank text clears the filter.
    pub fn search(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim();
        self.search = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn sort(mut self, sort: ProductSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Returns a copy with page and page size clamped to valid ranges.
    pub fn normalized(&self) -> Self {
        let mut query = self.clone();
        query.page = query.page.max(1);
        query.page_size = query.page_size.clamp(1, MAX_PAGE_SIZE);
        query
    }

    /// Number of items to skip for the (normalized) page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    /// Returns true if the product passes every filter of this query.
    pub fn matches(&self, product: &Product) -> bool {
        if !product.is_available {
            return false;
        }
        if let Some(category_id) = self.category_id
            && product.category_id != category_id
        {
            return false;
        }
        if let Some(brand_id) = self.brand_id
            && product.brand_id != Some(brand_id)
        {
            return false;
        }
        if let Some(ref text) = self.search {
            let needle = text.to_lowercase();
            let in_name = product.name.to_lowercase().contains(&needle);
            let in_description = product
                .description
                .as_ref()
                .is_some_and(|d| d.to_lowercase().contains(&needle));
            if !in_name && !in_description {
                return false;
            }
        }
        true
    }

    /// Orders products according to the query's sort, ties broken by id.
    pub fn sort_products(&self, products: &mut [Product]) {
        match self.sort {
            ProductSort::PriceAsc => {
                products.sort_by(|a, b| a.price.cmp(&b.price).then(a.id.cmp(&b.id)))
            }
            ProductSort::PriceDesc => {
                products.sort_by(|a, b| b.price.cmp(&a.price).then(a.id.cmp(&b.id)))
            }
            ProductSort::Name => {
                products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)))
            }
            ProductSort::Newest => {
                products.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewProduct;
    use chrono::{Duration, Utc};
    use common::Money;

    fn product(name: &str, cents: i64, category: CategoryId) -> Product {
        NewProduct::new(name, Money::from_cents(cents), 5, category).into_product(Utc::now())
    }

    #[test]
    fn sort_param_falls_back_to_name() {
        assert_eq!(ProductSort::from_param("price_desc"), ProductSort::PriceDesc);
        assert_eq!(ProductSort::from_param("newest"), ProductSort::Newest);
        assert_eq!(ProductSort::from_param("bogus"), ProductSort::Name);
    }

    #[test]
    fn normalized_clamps_paging() {
        let query = ProductQuery::new().page(0).page_size(1000).normalized();
        assert_eq!(query.page, 1);
        assert_eq!(query.page_size, MAX_PAGE_SIZE);

        let query = ProductQuery::new().page(3).page_size(0).normalized();
        assert_eq!(query.page_size, 1);
        assert_eq!(query.offset(), 2);
    }

    #[test]
    fn blank_search_is_ignored() {
        assert_eq!(ProductQuery::new().search("   ").search, None);
        assert_eq!(
            ProductQuery::new().search("  shirt ").search.as_deref(),
            Some("shirt")
        );
    }

    #[test]
    fn matches_filters() {
        let shirts = CategoryId::new();
        let shoes = CategoryId::new();
        let mut linen = product("Linen Shirt", 3000, shirts);
        linen.description = Some("Light summer fabric".to_string());
        let boots = product("Boots", 9000, shoes);
        let hidden = NewProduct::new("Hidden", Money::from_cents(100), 1, shirts)
            .unavailable()
            .into_product(Utc::now());

        let query = ProductQuery::new().category(shirts);
        assert!(query.matches(&linen));
        assert!(!query.matches(&boots));
        assert!(!query.matches(&hidden));

        let query = ProductQuery::new().search("SUMMER");
        assert!(query.matches(&linen));
        assert!(!query.matches(&boots));

        let query = ProductQuery::new().brand(BrandId::new());
        assert!(!query.matches(&linen));
    }

    #[test]
    fn sorts_by_price_and_recency() {
        let category = CategoryId::new();
        let mut cheap = product("B", 100, category);
        let pricey = product("A", 900, category);
        cheap.created_at = Utc::now() + Duration::seconds(10);

        let mut products = vec![cheap.clone(), pricey.clone()];
        ProductQuery::new().sort(ProductSort::PriceDesc).sort_products(&mut products);
        assert_eq!(products[0].id, pricey.id);

        ProductQuery::new().sort(ProductSort::Name).sort_products(&mut products);
        assert_eq!(products[0].id, pricey.id);

        ProductQuery::new().sort(ProductSort::Newest).sort_products(&mut products);
        assert_eq!(products[0].id, cheap.id);
    }
}
