/*!
 * Local and distributed objects behind one interface
 *
 * `construct` looks at its arguments: if any of them is remote, the class is
 * instantiated once per grid point and a `DistributedInstance` is returned;
 * otherwise a single `LocalInstance` is built in-process. Both answer the same
 * enumerated requests and both keep a per-name cache for `Constant` reads.
 */

use async_trait::async_trait;
use quasar_core_interface::{Class, ExecutorError, ObjectRef, RemoteError, Value, WorkerId};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::aggregate::{aggregate, consensus, Output, ResultKind};
use crate::error::{QuasarError, Result};
use crate::proxy::{dispatch_round, Arg, CallArgs, CartesianProxy, Dispatched, Operation};
use crate::topology::GridKey;

/// Name the local variant reports as its only worker
pub const LOCALHOST: &str = "localhost";

/// Requests every object answers, wherever it lives
#[async_trait]
pub trait ObjectInterface: Send + Sync {
    async fn call(&self, method: &str, args: CallArgs<'_>, kind: &ResultKind) -> Result<Output>;

    async fn get(&self, name: &str, kind: &ResultKind) -> Result<Output>;

    /// Assign on every instance; returns once every instance acknowledged
    async fn set(&self, name: &str, value: Value) -> Result<()>;

    fn workers(&self) -> Vec<WorkerId>;

    fn coords(&self) -> Vec<Vec<usize>>;

    fn dims(&self) -> Vec<usize>;

    fn ranks(&self) -> Vec<usize>;

    fn index(&self, key: &GridKey) -> Result<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Values read once under `ResultKind::Constant`, keyed by name
#[derive(Debug, Default)]
pub struct ConstantCache {
    values: Mutex<HashMap<String, Value>>,
}

impl ConstantCache {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values
            .lock()
            .ok()
            .and_then(|values| values.get(name).cloned())
    }

    /// Keep the first value stored under `name`
    pub fn insert(&self, name: &str, value: Value) {
        if let Ok(mut values) = self.values.lock() {
            values.entry(name.to_string()).or_insert(value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.lock().map(|values| values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An object living in the caller's process
#[derive(Debug)]
pub struct LocalInstance {
    object: ObjectRef,
    cache: ConstantCache,
}

impl LocalInstance {
    pub fn new(object: ObjectRef) -> Self {
        Self {
            object,
            cache: ConstantCache::default(),
        }
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    pub fn cache(&self) -> &ConstantCache {
        &self.cache
    }

    fn local_output(&self, name: &str, value: Value, kind: &ResultKind) -> Output {
        if kind.is_cached() {
            self.cache.insert(name, value.clone());
        }
        match kind {
            ResultKind::Tuple => Output::Tuple(vec![value]),
            _ => Output::Value(value),
        }
    }
}

#[async_trait]
impl ObjectInterface for LocalInstance {
    async fn call(&self, method: &str, args: CallArgs<'_>, kind: &ResultKind) -> Result<Output> {
        if kind.is_cached() {
            if let Some(value) = self.cache.get(method) {
                return Ok(Output::Value(value));
            }
        }
        match args.to_local_args() {
            Some(local) => {
                let value = self
                    .object
                    .call(method, local)
                    .map_err(|e| local_failure(&format!("call:{}", method), e))?;
                Ok(self.local_output(method, value, kind))
            }
            None => {
                // remote arguments turn the call into a dispatch of this object
                let receiver = Arg::Local(Value::Object(self.object.clone()));
                // only a round on a grid can stay distributed
                let require_grid = matches!(kind, ResultKind::Remote | ResultKind::Array(_));
                let round =
                    dispatch_round(Operation::call(method), Some(receiver), args, require_grid)
                        .await?;
                let output = finish(round, kind).await?;
                if let (true, Some(value)) = (kind.is_cached(), output.as_value()) {
                    self.cache.insert(method, value.clone());
                }
                Ok(output)
            }
        }
    }

    async fn get(&self, name: &str, kind: &ResultKind) -> Result<Output> {
        if kind.is_cached() {
            if let Some(value) = self.cache.get(name) {
                return Ok(Output::Value(value));
            }
        }
        let value = self
            .object
            .get_attr(name)
            .map_err(|e| local_failure(&format!("getattr:{}", name), e))?;
        Ok(self.local_output(name, value, kind))
    }

    async fn set(&self, name: &str, value: Value) -> Result<()> {
        self.object
            .set_attr(name, value)
            .map_err(|e| local_failure(&format!("setattr:{}", name), e))
    }

    fn workers(&self) -> Vec<WorkerId> {
        vec![WorkerId::new(LOCALHOST)]
    }

    fn coords(&self) -> Vec<Vec<usize>> {
        vec![vec![0]]
    }

    fn dims(&self) -> Vec<usize> {
        vec![1]
    }

    fn ranks(&self) -> Vec<usize> {
        vec![0]
    }

    fn index(&self, key: &GridKey) -> Result<usize> {
        let found = match key {
            GridKey::Rank(rank) => *rank == 0,
            GridKey::Worker(worker) => worker.as_str() == LOCALHOST,
            GridKey::Coords(coords) => coords.iter().all(|c| *c == 0),
        };
        if found {
            Ok(0)
        } else {
            Err(QuasarError::KeyNotFound(format!("{:?} in a local object", key)))
        }
    }

    fn len(&self) -> usize {
        1
    }
}

/// One instance per grid point
#[derive(Debug)]
pub struct DistributedInstance {
    proxy: CartesianProxy,
    cache: ConstantCache,
}

impl DistributedInstance {
    pub fn new(proxy: CartesianProxy) -> Self {
        Self {
            proxy,
            cache: ConstantCache::default(),
        }
    }

    pub fn proxy(&self) -> &CartesianProxy {
        &self.proxy
    }

    pub fn cache(&self) -> &ConstantCache {
        &self.cache
    }

    async fn finish(&self, name: &str, round: CartesianProxy, kind: &ResultKind) -> Result<Output> {
        let output = aggregate(round, kind).await?;
        if let (true, Some(value)) = (kind.is_cached(), output.as_value()) {
            debug!(name, "Caching constant");
            self.cache.insert(name, value.clone());
        }
        Ok(output)
    }
}

#[async_trait]
impl ObjectInterface for DistributedInstance {
    async fn call(&self, method: &str, args: CallArgs<'_>, kind: &ResultKind) -> Result<Output> {
        if kind.is_cached() {
            if let Some(value) = self.cache.get(method) {
                return Ok(Output::Value(value));
            }
        }
        let round = self.proxy.call(method, args).await?;
        self.finish(method, round, kind).await
    }

    async fn get(&self, name: &str, kind: &ResultKind) -> Result<Output> {
        if kind.is_cached() {
            if let Some(value) = self.cache.get(name) {
                return Ok(Output::Value(value));
            }
        }
        let round = self.proxy.get_attr(name).await?;
        self.finish(name, round, kind).await
    }

    async fn set(&self, name: &str, value: Value) -> Result<()> {
        self.proxy.set_attr(name, value).await
    }

    fn workers(&self) -> Vec<WorkerId> {
        self.proxy.workers().to_vec()
    }

    fn coords(&self) -> Vec<Vec<usize>> {
        self.proxy.grid().coords().to_vec()
    }

    fn dims(&self) -> Vec<usize> {
        self.proxy.grid().dims().to_vec()
    }

    fn ranks(&self) -> Vec<usize> {
        self.proxy.grid().ranks().to_vec()
    }

    fn index(&self, key: &GridKey) -> Result<usize> {
        self.proxy.grid().index(key)
    }

    fn len(&self) -> usize {
        self.proxy.len()
    }
}

/// Either variant, chosen by [`construct`]
#[derive(Debug)]
pub enum Instance {
    Local(LocalInstance),
    Distributed(DistributedInstance),
}

impl Instance {
    pub fn is_distributed(&self) -> bool {
        matches!(self, Instance::Distributed(_))
    }

    fn inner(&self) -> &dyn ObjectInterface {
        match self {
            Instance::Local(local) => local,
            Instance::Distributed(distributed) => distributed,
        }
    }
}

#[async_trait]
impl ObjectInterface for Instance {
    async fn call(&self, method: &str, args: CallArgs<'_>, kind: &ResultKind) -> Result<Output> {
        self.inner().call(method, args, kind).await
    }

    async fn get(&self, name: &str, kind: &ResultKind) -> Result<Output> {
        self.inner().get(name, kind).await
    }

    async fn set(&self, name: &str, value: Value) -> Result<()> {
        self.inner().set(name, value).await
    }

    fn workers(&self) -> Vec<WorkerId> {
        self.inner().workers()
    }

    fn coords(&self) -> Vec<Vec<usize>> {
        self.inner().coords()
    }

    fn dims(&self) -> Vec<usize> {
        self.inner().dims()
    }

    fn ranks(&self) -> Vec<usize> {
        self.inner().ranks()
    }

    fn index(&self, key: &GridKey) -> Result<usize> {
        self.inner().index(key)
    }

    fn len(&self) -> usize {
        self.inner().len()
    }
}

/// Instantiate `class` locally, or once per grid point if any argument is remote
pub async fn construct(class: Class, args: CallArgs<'_>) -> Result<Instance> {
    if args.has_remote() {
        let proxy = CartesianProxy::construct(class, args).await?;
        return Ok(Instance::Distributed(DistributedInstance::new(proxy)));
    }
    let local = args.to_local_args().unwrap_or_default();
    let object = class
        .instantiate(local)
        .map_err(|e| local_failure(&format!("construct:{}", class.name()), e))?;
    Ok(Instance::Local(LocalInstance::new(object)))
}

/// Resolve a round that may have no grid (plain handle set arguments)
async fn finish(round: Dispatched, kind: &ResultKind) -> Result<Output> {
    if round.grid.is_some() {
        return aggregate(round.into_proxy()?, kind).await;
    }
    match kind {
        ResultKind::Tuple => Ok(Output::Tuple(round.handles.results().await?)),
        ResultKind::Global | ResultKind::Constant => {
            Ok(Output::Value(consensus(round.handles.results().await?)?))
        }
        ResultKind::Remote | ResultKind::Array(_) => round.into_proxy().map(Output::Proxy),
    }
}

fn local_failure(task: &str, source: RemoteError) -> QuasarError {
    QuasarError::Remote(ExecutorError::TaskFailed {
        task: task.to_string(),
        worker: WorkerId::new(LOCALHOST),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quasar_core_interface::{Args, RemoteObject};

    #[derive(Debug)]
    struct Ticker {
        reads: i64,
    }

    impl RemoteObject for Ticker {
        fn type_name(&self) -> &'static str {
            "Ticker"
        }

        fn get_attr(&self, name: &str) -> std::result::Result<Value, RemoteError> {
            match name {
                "reads" => Ok(Value::Int(self.reads)),
                _ => Err(RemoteError::AttributeNotFound {
                    type_name: "Ticker".to_string(),
                    name: name.to_string(),
                }),
            }
        }

        fn set_attr(&mut self, name: &str, value: Value) -> std::result::Result<(), RemoteError> {
            match (name, value) {
                ("reads", Value::Int(v)) => {
                    self.reads = v;
                    Ok(())
                }
                (name, _) => Err(RemoteError::Failed(format!("cannot set {}", name))),
            }
        }

        fn call(&mut self, method: &str, _args: Args) -> std::result::Result<Value, RemoteError> {
            match method {
                "tick" => {
                    self.reads += 1;
                    Ok(Value::Int(self.reads))
                }
                _ => Err(RemoteError::MethodNotFound {
                    type_name: "Ticker".to_string(),
                    name: method.to_string(),
                }),
            }
        }
    }

    fn ticker() -> Class {
        Class::new("Ticker", |_| Ok(Box::new(Ticker { reads: 0 })))
    }

    #[tokio::test]
    async fn test_plain_arguments_build_local_instance() {
        let instance = construct(ticker(), CallArgs::new().arg(1)).await.unwrap();
        assert!(!instance.is_distributed());
        assert_eq!(instance.workers(), vec![WorkerId::new(LOCALHOST)]);
        assert_eq!(instance.coords(), vec![vec![0]]);
        assert_eq!(instance.dims(), vec![1]);
        assert_eq!(instance.ranks(), vec![0]);
        assert_eq!(instance.index(&GridKey::from(LOCALHOST)).unwrap(), 0);
        assert_eq!(instance.index(&GridKey::from(vec![0, 0])).unwrap(), 0);
        assert!(instance.index(&GridKey::Rank(1)).is_err());
    }

    #[tokio::test]
    async fn test_local_constant_is_cached() {
        let instance = construct(ticker(), CallArgs::new()).await.unwrap();
        let first = instance
            .call("tick", CallArgs::new(), &ResultKind::Constant)
            .await
            .unwrap();
        let second = instance
            .call("tick", CallArgs::new(), &ResultKind::Constant)
            .await
            .unwrap();
        assert_eq!(first.as_value(), Some(&Value::Int(1)));
        assert_eq!(second.as_value(), Some(&Value::Int(1)));

        let fresh = instance.call("tick", CallArgs::new(), &ResultKind::Global).await.unwrap();
        assert_eq!(fresh.into_value(), Some(Value::Int(2)));
    }

    #[tokio::test]
    async fn test_local_failure_is_remote_category() {
        let instance = construct(ticker(), CallArgs::new()).await.unwrap();
        let err = instance.set("name", Value::from("x")).await.unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Remote);
        assert!(err.to_string().contains(LOCALHOST));
    }
}
