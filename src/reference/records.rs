//! Typed dimension records.
//!
//! Each record declares the fixed set of columns it carries. Anything else
//! a partition happens to contain is dropped at this boundary, so the rest
//! of the pipeline never sees untyped column maps.

/// A typed dimension record with a fixed field set.
pub trait DimensionRecord: Sized + Send + Sync {
    /// Column holding the join key.
    const KEY_COLUMN: &'static str;

    /// Columns the record carries besides the key.
    const ATTRIBUTE_COLUMNS: &'static [&'static str];

    /// Build a record from one partition row. `attributes` arrives in
    /// [`Self::ATTRIBUTE_COLUMNS`] order.
    fn from_row(key: String, attributes: Vec<Option<String>>) -> Self;

    /// The join key value.
    fn key(&self) -> &str;
}

/// A customer dimension record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub customer_name: Option<String>,
    pub gender: Option<String>,
}

impl DimensionRecord for CustomerRecord {
    const KEY_COLUMN: &'static str = "customer_id";
    const ATTRIBUTE_COLUMNS: &'static [&'static str] = &["customer_name", "gender"];

    fn from_row(key: String, attributes: Vec<Option<String>>) -> Self {
        let mut attrs = attributes.into_iter();
        Self {
            customer_id: key,
            customer_name: attrs.next().flatten(),
            gender: attrs.next().flatten(),
        }
    }

    fn key(&self) -> &str {
        &self.customer_id
    }
}

/// A product dimension record.
///
/// `product_price` stays a verbatim decimal string; numeric parsing happens
/// at derivation time so a bad price is reported against the order that hit
/// it rather than silently coerced at load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub product_id: String,
    pub product_name: Option<String>,
    pub product_price: Option<String>,
    pub supplier_name: Option<String>,
    pub supplier_id: Option<String>,
    pub store_id: Option<String>,
    pub store_name: Option<String>,
}

impl DimensionRecord for ProductRecord {
    const KEY_COLUMN: &'static str = "productID";
    const ATTRIBUTE_COLUMNS: &'static [&'static str] = &[
        "productName",
        "productPrice",
        "supplierName",
        "supplierID",
        "storeID",
        "storeName",
    ];

    fn from_row(key: String, attributes: Vec<Option<String>>) -> Self {
        let mut attrs = attributes.into_iter();
        Self {
            product_id: key,
            product_name: attrs.next().flatten(),
            product_price: attrs.next().flatten(),
            supplier_name: attrs.next().flatten(),
            supplier_id: attrs.next().flatten(),
            store_id: attrs.next().flatten(),
            store_name: attrs.next().flatten(),
        }
    }

    fn key(&self) -> &str {
        &self.product_id
    }
}
