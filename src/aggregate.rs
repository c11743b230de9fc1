/*!
 * Aggregation of dispatch results
 *
 * A result kind is chosen per call. `Remote` keeps the slots where they are;
 * the other kinds drain every slot first, so nothing is left in flight when a
 * value (or an error) reaches the caller.
 */

use quasar_core_interface::Value;
use tracing::warn;

use crate::array::ChunkedArray;
use crate::error::{QuasarError, Result};
use crate::placement::ArraySpec;
use crate::proxy::CartesianProxy;

/// How a dispatch round is turned into a caller value
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResultKind {
    /// Keep the per-slot results as a new distributed object
    #[default]
    Remote,
    /// One value per slot, in slot order
    Tuple,
    /// A single value all slots agree on
    Global,
    /// Like `Global`, and cached by the caller-facing wrapper
    Constant,
    /// Blocks of a chunked array, one per grid point
    Array(ArraySpec),
}

impl ResultKind {
    /// Whether the value is remembered after the first read
    pub fn is_cached(&self) -> bool {
        matches!(self, ResultKind::Constant)
    }
}

/// Caller-facing value of an aggregated dispatch
#[derive(Debug)]
pub enum Output {
    Proxy(CartesianProxy),
    Tuple(Vec<Value>),
    Value(Value),
    Array(ChunkedArray),
}

impl Output {
    pub fn into_proxy(self) -> Option<CartesianProxy> {
        match self {
            Output::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn into_tuple(self) -> Option<Vec<Value>> {
        match self {
            Output::Tuple(values) => Some(values),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Output::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<ChunkedArray> {
        match self {
            Output::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Output::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// The single value shared by every slot.
///
/// # Errors
///
/// `QuasarError::InconsistentResult` carrying every slot's value when they differ.
pub fn consensus(values: Vec<Value>) -> Result<Value> {
    match values.first() {
        Some(first) if values.iter().all(|v| v == first) => Ok(first.clone()),
        _ => {
            warn!("Slots disagree on a global value: {:?}", values);
            Err(QuasarError::InconsistentResult { values })
        }
    }
}

pub async fn tuple(proxy: &CartesianProxy) -> Result<Vec<Value>> {
    proxy.results().await
}

pub async fn global(proxy: &CartesianProxy) -> Result<Value> {
    consensus(proxy.results().await?)
}

/// Resolve `proxy` according to `kind`
pub async fn aggregate(proxy: CartesianProxy, kind: &ResultKind) -> Result<Output> {
    match kind {
        ResultKind::Remote => Ok(Output::Proxy(proxy)),
        ResultKind::Tuple => Ok(Output::Tuple(tuple(&proxy).await?)),
        ResultKind::Global | ResultKind::Constant => Ok(Output::Value(global(&proxy).await?)),
        ResultKind::Array(spec) => {
            let array = proxy.grid().assemble(proxy.handles(), spec).await?;
            Ok(Output::Array(array))
        }
    }
}

impl CartesianProxy {
    pub async fn resolve(self, kind: &ResultKind) -> Result<Output> {
        aggregate(self, kind).await
    }
}
