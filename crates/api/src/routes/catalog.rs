//! Catalog browsing endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::{BrandId, CategoryId, Page, ProductId};
use serde::{Deserialize, Serialize};
use store::{Brand, CatalogReader, Category, Product, ProductQuery, ProductSort, Storefront};

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

/// Query string of `GET /products`.
#[derive(Debug, Default, Deserialize)]
pub struct ProductListParams {
    pub category_id: Option<String>,
    pub brand_id: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ProductListParams {
    fn into_query(self) -> Result<ProductQuery, ApiError> {
        let mut query = ProductQuery::new();
        if let Some(ref raw) = self.category_id {
            query = query.category(parse_id::<CategoryId>(raw, "category_id")?);
        }
        if let Some(ref raw) = self.brand_id {
            query = query.brand(parse_id::<BrandId>(raw, "brand_id")?);
        }
        if let Some(search) = self.search {
            query = query.search(search);
        }
        if let Some(ref sort) = self.sort {
            query = query.sort(ProductSort::from_param(sort));
        }
        if let Some(page) = self.page {
            query = query.page(page);
        }
        if let Some(page_size) = self.page_size {
            query = query.page_size(page_size);
        }
        Ok(query)
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub price: String,
    pub stock: u32,
    pub is_available: bool,
    pub available_sizes: Vec<String>,
    pub available_colors: Vec<String>,
    pub category_id: String,
    pub brand_id: Option<String>,
    pub created_at: String,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id.to_string(),
            name: product.name,
            description: product.description,
            price_cents: product.price.cents(),
            price: product.price.to_string(),
            stock: product.stock,
            is_available: product.is_available,
            available_sizes: product.available_sizes,
            available_colors: product.available_colors,
            category_id: product.category_id.to_string(),
            brand_id: product.brand_id.map(|b| b.to_string()),
            created_at: product.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u32,
    pub has_previous: bool,
    pub has_next: bool,
}

impl<T> PageResponse<T> {
    fn from_page<U: Into<T>>(page: Page<U>) -> Self {
        Self {
            total_pages: page.total_pages(),
            has_previous: page.has_previous(),
            has_next: page.has_next(),
            page: page.page,
            page_size: page.page_size,
            total_items: page.total_items,
            items: page.items.into_iter().map(Into::into).collect(),
        }
    }
}

// -- Handlers --

/// GET /products: available products, filtered, sorted and paginated.
#[tracing::instrument(skip(state))]
pub async fn list<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ProductListParams>,
) -> Result<Json<PageResponse<ProductResponse>>, ApiError> {
    let query = params.into_query()?;
    let page = state.store.search_products(&query).await?;
    Ok(Json(PageResponse::from_page(page)))
}

/// GET /products/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product_id: ProductId = parse_id(&id, "product id")?;
    let product = state
        .store
        .get_product(product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product {product_id} not found")))?;
    Ok(Json(product.into()))
}

/// GET /categories
pub async fn categories<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.store.list_categories().await?))
}

/// GET /brands
pub async fn brands<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Brand>>, ApiError> {
    Ok(Json(state.store.list_brands().await?))
}
