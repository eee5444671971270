use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    BrandId, CartId, CartLineId, CategoryId, CustomerId, Money, OrderId, OrderLineId, Page,
    ProductId, SessionToken,
};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    Brand, Cart, CartLine, CartOwner, Category, Customer, LineMutation, MAX_LINE_QUANTITY,
    NewCartLine, NewProduct, Order, OrderLine, OrderStatus, PlaceOrder, Product, ProductQuery, ProductSort, Result,
    StoreError,
    store::{CartRepository, CatalogReader, IdentityResolver, OrderRepository},
};

const PRODUCT_COLUMNS: &str = "id, name, description, price_cents, stock, is_available, \
     available_sizes, available_colors, category_id, brand_id, created_at";

const CART_COLUMNS: &str = "id, session_token, customer_id, version, created_at, updated_at";

const LINE_COLUMNS: &str = "id, cart_id, product_id, quantity, selected_size, selected_color";

const ORDER_COLUMNS: &str =
    "id, order_number, customer_id, status, total_cents, delivery_address, note, created_at";

/// Inserts a cart line, summing quantities with the line of the same identity.
/// A sum past the limit trips `cart_lines_quantity_range`.
const UPSERT_LINE_SQL: &str = r#"
    INSERT INTO cart_lines (id, cart_id, product_id, quantity, selected_size, selected_color)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (cart_id, product_id, COALESCE(selected_size, ''), COALESCE(selected_color, ''))
    DO UPDATE SET quantity = cart_lines.quantity + EXCLUDED.quantity
    RETURNING id, cart_id, product_id, quantity, selected_size, selected_color
"#;

/// Like [`UPSERT_LINE_SQL`], but caps the summed quantity at `$7`.
const ABSORB_LINE_SQL: &str = r#"
    INSERT INTO cart_lines (id, cart_id, product_id, quantity, selected_size, selected_color)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (cart_id, product_id, COALESCE(selected_size, ''), COALESCE(selected_color, ''))
    DO UPDATE SET quantity = LEAST(cart_lines.quantity + EXCLUDED.quantity, $7)
"#;

const QUANTITY_CONSTRAINT: &str = "cart_lines_quantity_range";

const BUMP_CART_SQL: &str =
    "UPDATE carts SET version = version + 1, updated_at = NOW() WHERE id = $1";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool to the given database URL.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        debug!("storefront migrations applied");
        Ok(())
    }

    pub async fn insert_category(&self, name: &str) -> Result<Category> {
        let category = Category {
            id: CategoryId::new(),
            name: name.to_string(),
            description: None,
        };
        sqlx::query("INSERT INTO categories (id, name) VALUES ($1, $2)")
            .bind(category.id.as_uuid())
            .bind(&category.name)
            .execute(&self.pool)
            .await?;
        Ok(category)
    }

    pub async fn insert_brand(&self, name: &str) -> Result<Brand> {
        let brand = Brand {
            id: BrandId::new(),
            name: name.to_string(),
            description: None,
            logo_url: None,
        };
        sqlx::query("INSERT INTO brands (id, name) VALUES ($1, $2)")
            .bind(brand.id.as_uuid())
            .bind(&brand.name)
            .execute(&self.pool)
            .await?;
        Ok(brand)
    }

    pub async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        let product = product.into_product(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price_cents, stock, is_available,
                                  available_sizes, available_colors, category_id, brand_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.cents())
        .bind(to_db_count(product.stock)?)
        .bind(product.is_available)
        .bind(&product.available_sizes)
        .bind(&product.available_colors)
        .bind(product.category_id.as_uuid())
        .bind(product.brand_id.map(|b| b.as_uuid()))
        .bind(product.created_at)
        .execute(&self.pool)
        .await?;
        Ok(product)
    }

    /// Stores a customer and links it to the given principal.
    pub async fn insert_customer(&self, principal: &str, customer: &Customer) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO customers (id, name, email, phone, address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(customer.id.as_uuid())
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(&customer.address)
        .bind(customer.created_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO principals (principal, customer_id) VALUES ($1, $2)
            ON CONFLICT (principal) DO UPDATE SET customer_id = EXCLUDED.customer_id
            "#,
        )
        .bind(principal)
        .bind(customer.id.as_uuid())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    fn row_to_product(row: &PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock: from_db_count(row.try_get("stock")?)?,
            is_available: row.try_get("is_available")?,
            available_sizes: row.try_get("available_sizes")?,
            available_colors: row.try_get("available_colors")?,
            category_id: CategoryId::from_uuid(row.try_get::<Uuid, _>("category_id")?),
            brand_id: row
                .try_get::<Option<Uuid>, _>("brand_id")?
                .map(BrandId::from_uuid),
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }

    fn row_to_cart(row: &PgRow) -> Result<Cart> {
        let id = CartId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let session: Option<String> = row.try_get("session_token")?;
        let customer: Option<Uuid> = row.try_get("customer_id")?;
        let owner = match (customer, session) {
            (Some(customer), _) => CartOwner::Customer(CustomerId::from_uuid(customer)),
            (None, Some(token)) => CartOwner::Session(SessionToken::new(token)),
            (None, None) => return Err(StoreError::Corrupt(format!("cart {id} has no owner"))),
        };

        Ok(Cart {
            id,
            owner,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            lines: Vec::new(),
        })
    }

    fn row_to_line(row: &PgRow) -> Result<CartLine> {
        Ok(CartLine {
            id: CartLineId::from_uuid(row.try_get::<Uuid, _>("id")?),
            cart_id: CartId::from_uuid(row.try_get::<Uuid, _>("cart_id")?),
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            quantity: from_db_count(row.try_get("quantity")?)?,
            selected_size: row.try_get("selected_size")?,
            selected_color: row.try_get("selected_color")?,
        })
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_number: row.try_get("order_number")?,
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            status: status.parse().map_err(StoreError::Corrupt)?,
            total: Money::from_cents(row.try_get("total_cents")?),
            delivery_address: row.try_get("delivery_address")?,
            note: row.try_get("note")?,
            created_at: row.try_get("created_at")?,
            lines: Vec::new(),
        })
    }

    fn row_to_order_line(row: &PgRow) -> Result<OrderLine> {
        Ok(OrderLine {
            id: OrderLineId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            quantity: from_db_count(row.try_get("quantity")?)?,
            price_at_order: Money::from_cents(row.try_get("price_at_order_cents")?),
            selected_size: row.try_get("selected_size")?,
            selected_color: row.try_get("selected_color")?,
        })
    }

    /// Loads the lines of a cart in insertion order.
    async fn load_lines(conn: &mut PgConnection, cart_id: CartId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM cart_lines WHERE cart_id = $1 ORDER BY created_at, id"
        ))
        .bind(cart_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(Self::row_to_line).collect()
    }

    async fn load_cart_by_id(conn: &mut PgConnection, cart_id: CartId) -> Result<Option<Cart>> {
        let row = sqlx::query(&format!("SELECT {CART_COLUMNS} FROM carts WHERE id = $1"))
            .bind(cart_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => {
                let mut cart = Self::row_to_cart(&row)?;
                cart.lines = Self::load_lines(conn, cart.id).await?;
                Ok(Some(cart))
            }
            None => Ok(None),
        }
    }

    async fn load_cart_by_owner(
        conn: &mut PgConnection,
        owner: &CartOwner,
    ) -> Result<Option<Cart>> {
        let row = match owner {
            CartOwner::Session(token) => {
                sqlx::query(&format!(
                    "SELECT {CART_COLUMNS} FROM carts WHERE session_token = $1"
                ))
                .bind(token.as_str())
                .fetch_optional(&mut *conn)
                .await?
            }
            CartOwner::Customer(customer_id) => {
                sqlx::query(&format!(
                    "SELECT {CART_COLUMNS} FROM carts WHERE customer_id = $1"
                ))
                .bind(customer_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await?
            }
        };

        match row {
            Some(row) => {
                let mut cart = Self::row_to_cart(&row)?;
                cart.lines = Self::load_lines(conn, cart.id).await?;
                Ok(Some(cart))
            }
            None => Ok(None),
        }
    }

    async fn upsert_line(
        conn: &mut PgConnection,
        cart_id: CartId,
        line: &NewCartLine,
    ) -> Result<CartLine> {
        let quantity_limit = StoreError::QuantityLimit {
            product_id: line.product_id,
        };
        if line.quantity > MAX_LINE_QUANTITY {
            return Err(quantity_limit);
        }

        let row = sqlx::query(UPSERT_LINE_SQL)
            .bind(Uuid::new_v4())
            .bind(cart_id.as_uuid())
            .bind(line.product_id.as_uuid())
            .bind(to_db_count(line.quantity)?)
            .bind(&line.selected_size)
            .bind(&line.selected_color)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| {
                if violates_constraint(&e, QUANTITY_CONSTRAINT) {
                    quantity_limit
                } else {
                    e.into()
                }
            })?;

        Self::row_to_line(&row)
    }

    /// Bumps the cart version. Returns false if the cart does not exist.
    async fn bump_cart(conn: &mut PgConnection, cart_id: CartId) -> Result<bool> {
        let result = sqlx::query(BUMP_CART_SQL)
            .bind(cart_id.as_uuid())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Locks the cart keyed by a session token.
    async fn lock_session_cart(
        conn: &mut PgConnection,
        token: &SessionToken,
    ) -> Result<Option<CartId>> {
        let id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM carts WHERE session_token = $1 FOR UPDATE")
                .bind(token.as_str())
                .fetch_optional(&mut *conn)
                .await?;
        Ok(id.map(CartId::from_uuid))
    }

    async fn count_lines(conn: &mut PgConnection, cart_id: CartId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cart_lines WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    /// Locks a line and reports which cart owns it and which product it holds.
    async fn lock_line_owner(
        conn: &mut PgConnection,
        line_id: CartLineId,
    ) -> Result<Option<(CartId, ProductId)>> {
        let row = sqlx::query("SELECT cart_id, product_id FROM cart_lines WHERE id = $1 FOR UPDATE")
            .bind(line_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;
        row.map(|row| {
            Ok((
                CartId::from_uuid(row.try_get::<Uuid, _>("cart_id")?),
                ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            ))
        })
        .transpose()
    }

    async fn attach_order_lines(&self, orders: &mut [Order]) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, quantity, price_at_order_cents, selected_size, selected_color
            FROM order_lines
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_order: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in &rows {
            let order_id: Uuid = row.try_get("order_id")?;
            by_order
                .entry(order_id)
                .or_default()
                .push(Self::row_to_order_line(row)?);
        }
        for order in orders.iter_mut() {
            order.lines = by_order.remove(&order.id.as_uuid()).unwrap_or_default();
        }
        Ok(())
    }
}

fn to_db_count(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("count {value} out of range")))
}

fn from_db_count(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative count {value}")))
}

/// True when `err` was raised by the named unique or check constraint.
fn violates_constraint(err: &sqlx::Error, constraint: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.constraint() == Some(constraint);
    }
    false
}

fn sort_clause(sort: ProductSort) -> &'static str {
    match sort {
        ProductSort::PriceAsc => "price_cents ASC, id ASC",
        ProductSort::PriceDesc => "price_cents DESC, id ASC",
        ProductSort::Name => "name ASC, id ASC",
        ProductSort::Newest => "created_at DESC, id ASC",
    }
}

/// Builds the WHERE clause for a catalog query. Placeholders are numbered in
/// the order [`bind_filters`] binds them.
fn filter_clause(query: &ProductQuery) -> (String, usize) {
    let mut sql = String::from(" WHERE is_available");
    let mut param_count = 0;

    if query.category_id.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND category_id = ${param_count}"));
    }
    if query.brand_id.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND brand_id = ${param_count}"));
    }
    if query.search.is_some() {
        param_count += 1;
        sql.push_str(&format!(
            " AND (POSITION(LOWER(${param_count}) IN LOWER(name)) > 0 \
             OR POSITION(LOWER(${param_count}) IN LOWER(COALESCE(description, ''))) > 0)"
        ));
    }

    (sql, param_count)
}

fn bind_filters<'q>(
    mut sqlx_query: Query<'q, Postgres, PgArguments>,
    query: &'q ProductQuery,
) -> Query<'q, Postgres, PgArguments> {
    if let Some(category_id) = query.category_id {
        sqlx_query = sqlx_query.bind(category_id.as_uuid());
    }
    if let Some(brand_id) = query.brand_id {
        sqlx_query = sqlx_query.bind(brand_id.as_uuid());
    }
    if let Some(ref search) = query.search {
        sqlx_query = sqlx_query.bind(search.as_str());
    }
    sqlx_query
}

#[async_trait]
impl CatalogReader for PostgresStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_product).transpose()
    }

    async fn search_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        let query = query.normalized();
        let (where_sql, param_count) = filter_clause(&query);

        let count_sql = format!("SELECT COUNT(*) AS total FROM products{where_sql}");
        let count_row = bind_filters(sqlx::query(&count_sql), &query)
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = count_row.try_get("total")?;

        let list_sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products{where_sql} ORDER BY {} LIMIT ${} OFFSET ${}",
            sort_clause(query.sort),
            param_count + 1,
            param_count + 2,
        );
        let rows = bind_filters(sqlx::query(&list_sql), &query)
            .bind(i64::from(query.page_size))
            .bind(query.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .iter()
            .map(Self::row_to_product)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(
            items,
            query.page,
            query.page_size,
            total.max(0) as u64,
        ))
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let rows = sqlx::query("SELECT id, name, description FROM categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Category {
                    id: CategoryId::from_uuid(row.try_get::<Uuid, _>("id")?),
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                })
            })
            .collect()
    }

    async fn list_brands(&self) -> Result<Vec<Brand>> {
        let rows = sqlx::query("SELECT id, name, description, logo_url FROM brands ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Brand {
                    id: BrandId::from_uuid(row.try_get::<Uuid, _>("id")?),
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    logo_url: row.try_get("logo_url")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl IdentityResolver for PostgresStore {
    async fn resolve_customer(&self, principal: &str) -> Result<Option<CustomerId>> {
        let customer: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT customer_id FROM principals WHERE principal = $1")
                .bind(principal)
                .fetch_optional(&self.pool)
                .await?;

        Ok(customer.flatten().map(CustomerId::from_uuid))
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        let row = sqlx::query(
            "SELECT id, name, email, phone, address, created_at FROM customers WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Customer {
                id: CustomerId::from_uuid(row.try_get::<Uuid, _>("id")?),
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                phone: row.try_get("phone")?,
                address: row.try_get("address")?,
                created_at: row.try_get("created_at")?,
            })),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CartRepository for PostgresStore {
    async fn get_cart(&self, cart_id: CartId) -> Result<Option<Cart>> {
        let mut conn = self.pool.acquire().await?;
        Self::load_cart_by_id(&mut conn, cart_id).await
    }

    async fn find_cart(&self, owner: &CartOwner) -> Result<Option<Cart>> {
        let mut conn = self.pool.acquire().await?;
        Self::load_cart_by_owner(&mut conn, owner).await
    }

    async fn get_or_create_cart(&self, owner: &CartOwner) -> Result<Cart> {
        let mut conn = self.pool.acquire().await?;
        if let Some(cart) = Self::load_cart_by_owner(&mut conn, owner).await? {
            return Ok(cart);
        }

        // A concurrent request may insert the same owner first; the unique
        // constraints turn that into a no-op and we read the winner's cart.
        sqlx::query(
            r#"
            INSERT INTO carts (id, session_token, customer_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner.session_token().map(SessionToken::as_str))
        .bind(owner.customer_id().map(|c| c.as_uuid()))
        .execute(&mut *conn)
        .await?;

        Self::load_cart_by_owner(&mut conn, owner)
            .await?
            .ok_or_else(|| StoreError::Unavailable("cart disappeared after creation".to_string()))
    }

    async fn claim_session_cart(
        &self,
        token: &SessionToken,
        customer_id: CustomerId,
    ) -> Result<Option<Cart>> {
        let mut tx = self.pool.begin().await?;

        // Holding the cart row blocks concurrent line writes until commit.
        let Some(cart_id) = Self::lock_session_cart(&mut tx, token).await? else {
            return Ok(None);
        };
        if Self::count_lines(&mut tx, cart_id).await? == 0 {
            return Ok(None);
        }

        let claimed = sqlx::query(
            r#"
            UPDATE carts
            SET customer_id = $2, session_token = NULL, version = version + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(cart_id.as_uuid())
        .bind(customer_id.as_uuid())
        .execute(&mut *tx)
        .await;
        match claimed {
            Ok(_) => {}
            // The customer got a cart concurrently; leave the session cart alone.
            Err(e) if violates_constraint(&e, "carts_customer_id_key") => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let cart = Self::load_cart_by_id(&mut tx, cart_id).await?;
        tx.commit().await?;
        Ok(cart)
    }

    async fn discard_empty_session_cart(&self, token: &SessionToken) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let Some(cart_id) = Self::lock_session_cart(&mut tx, token).await? else {
            return Ok(false);
        };
        if Self::count_lines(&mut tx, cart_id).await? > 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM carts WHERE id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn absorb_session_cart(&self, token: &SessionToken, into: CartId) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let Some(source) = Self::lock_session_cart(&mut tx, token).await? else {
            return Ok(0);
        };
        if source == into {
            return Ok(0);
        }

        let target: Option<Uuid> = sqlx::query_scalar("SELECT id FROM carts WHERE id = $1 FOR UPDATE")
            .bind(into.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if target.is_none() {
            return Err(StoreError::CartNotFound(into));
        }

        let lines = Self::load_lines(&mut tx, source).await?;
        for line in &lines {
            sqlx::query(ABSORB_LINE_SQL)
                .bind(Uuid::new_v4())
                .bind(into.as_uuid())
                .bind(line.product_id.as_uuid())
                .bind(to_db_count(line.quantity)?)
                .bind(&line.selected_size)
                .bind(&line.selected_color)
                .bind(to_db_count(MAX_LINE_QUANTITY)?)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM carts WHERE id = $1")
            .bind(source.as_uuid())
            .execute(&mut *tx)
            .await?;
        if !lines.is_empty() {
            Self::bump_cart(&mut tx, into).await?;
        }

        tx.commit().await?;
        Ok(lines.len())
    }

    async fn add_line(&self, cart_id: CartId, line: NewCartLine) -> Result<CartLine> {
        let mut tx = self.pool.begin().await?;
        if !Self::bump_cart(&mut tx, cart_id).await? {
            return Err(StoreError::CartNotFound(cart_id));
        }
        let line = Self::upsert_line(&mut tx, cart_id, &line).await?;
        tx.commit().await?;
        Ok(line)
    }

    async fn set_line_quantity(
        &self,
        cart_id: CartId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<LineMutation> {
        let mut tx = self.pool.begin().await?;
        let product_id = match Self::lock_line_owner(&mut tx, line_id).await? {
            None => return Ok(LineMutation::Missing),
            Some((owner, _)) if owner != cart_id => return Ok(LineMutation::OwnedElsewhere),
            Some((_, product_id)) => product_id,
        };
        if quantity > MAX_LINE_QUANTITY {
            return Err(StoreError::QuantityLimit { product_id });
        }

        sqlx::query("UPDATE cart_lines SET quantity = $2 WHERE id = $1")
            .bind(line_id.as_uuid())
            .bind(to_db_count(quantity)?)
            .execute(&mut *tx)
            .await?;
        Self::bump_cart(&mut tx, cart_id).await?;
        tx.commit().await?;
        Ok(LineMutation::Applied)
    }

    async fn remove_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<LineMutation> {
        let mut tx = self.pool.begin().await?;
        match Self::lock_line_owner(&mut tx, line_id).await? {
            None => return Ok(LineMutation::Missing),
            Some((owner, _)) if owner != cart_id => return Ok(LineMutation::OwnedElsewhere),
            Some(_) => {}
        }

        sqlx::query("DELETE FROM cart_lines WHERE id = $1")
            .bind(line_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        Self::bump_cart(&mut tx, cart_id).await?;
        tx.commit().await?;
        Ok(LineMutation::Applied)
    }

    async fn clear_cart(&self, cart_id: CartId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if !Self::bump_cart(&mut tx, cart_id).await? {
            return Err(StoreError::CartNotFound(cart_id));
        }
        sqlx::query("DELETE FROM cart_lines WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PostgresStore {
    #[instrument(skip(self, request), fields(order_number = %request.order.order_number))]
    async fn place_order(&self, request: PlaceOrder) -> Result<Order> {
        let order = &request.order;
        let mut tx = self.pool.begin().await?;

        // Lock the cart so no line can change until commit.
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM carts WHERE id = $1 FOR UPDATE")
                .bind(request.cart_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let version = version.ok_or(StoreError::CartNotFound(request.cart_id))?;
        if version != request.cart_version {
            return Err(StoreError::CartModified {
                cart_id: request.cart_id,
                expected: request.cart_version,
                actual: version,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, customer_id, status, total_cents,
                                delivery_address, note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.order_number)
        .bind(order.customer_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.total.cents())
        .bind(&order.delivery_address)
        .bind(&order.note)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if violates_constraint(&e, "orders_order_number_key") {
                return StoreError::DuplicateOrderNumber(order.order_number.clone());
            }
            StoreError::Database(e)
        })?;

        for (position, line) in order.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_lines (id, order_id, product_id, quantity, price_at_order_cents,
                                         selected_size, selected_color, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(line.id.as_uuid())
            .bind(order.id.as_uuid())
            .bind(line.product_id.as_uuid())
            .bind(to_db_count(line.quantity)?)
            .bind(line.price_at_order.cents())
            .bind(&line.selected_size)
            .bind(&line.selected_color)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        // The guarded update takes the row lock and re-checks the predicate
        // after any concurrent writer commits, so stock never goes negative.
        for (product_id, quantity, price) in request.stock_demand() {
            let result = sqlx::query(
                r#"
                UPDATE products
                SET stock = stock - $2
                WHERE id = $1 AND is_available AND stock >= $2 AND price_cents = $3
                "#,
            )
            .bind(product_id.as_uuid())
            .bind(to_db_count(quantity)?)
            .bind(price.cents())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                debug!(%product_id, quantity, "guarded stock update matched no row");
                return Err(StoreError::StockConflict { product_id });
            }
        }

        sqlx::query("DELETE FROM cart_lines WHERE cart_id = $1")
            .bind(request.cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        Self::bump_cart(&mut tx, request.cart_id).await?;

        tx.commit().await?;
        debug!(lines = request.order.lines.len(), "order committed");
        Ok(request.order)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut orders = vec![Self::row_to_order(&row)?];
        self.attach_order_lines(&mut orders).await?;
        Ok(orders.pop())
    }

    async fn list_orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE customer_id = $1 ORDER BY created_at DESC, id"
        ))
        .bind(customer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut orders = rows
            .iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;
        self.attach_order_lines(&mut orders).await?;
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE orders SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id.as_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}
