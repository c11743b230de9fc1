/*!
 * Proxy dispatcher
 *
 * A dispatch turns one operation on a distributed object into one task per
 * slot. Slot *i* of every remote argument is handed to task *i*; local
 * arguments are copied unchanged into every task, in their original position.
 * Task *i* is pinned to the worker owning grid point *i*, so a plain dispatch
 * never moves an object.
 *
 * All checks run before the first submission: a missing remote argument,
 * grids that differ, slot counts that differ, array layouts that do not fit
 * the grid, handle sets whose slots are not held by the task owners, and a
 * missing grid when the result has to stay distributed.
 */

use quasar_core_interface::{
    Args, Class, HandleId, ObjectRef, RemoteError, Task, TaskExecutor, Value, WorkerId,
};
use quasar_core_topology::ArrayLayout;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::array::ChunkedArray;
use crate::error::{QuasarError, Result};
use crate::handles::HandleSet;
use crate::topology::GridTopology;

/// One argument of a dispatch
#[derive(Clone)]
pub enum Arg<'a> {
    /// Copied to every slot
    Local(Value),
    /// A bare handle set; slot *i* goes to task *i*
    Remote(&'a HandleSet),
    /// A distributed object; carries its grid
    Proxy(&'a CartesianProxy),
    /// The grid's own communicators
    Grid(&'a Arc<GridTopology>),
    /// A chunked array, split onto the grid first
    Array(&'a ChunkedArray),
}

impl<'a> Arg<'a> {
    pub fn is_remote(&self) -> bool {
        !matches!(self, Arg::Local(_))
    }

    fn grid(&self) -> Option<&'a Arc<GridTopology>> {
        match *self {
            Arg::Proxy(proxy) => Some(proxy.grid()),
            Arg::Grid(grid) => Some(grid),
            _ => None,
        }
    }

    fn slot_count(&self) -> Option<usize> {
        match self {
            Arg::Local(_) | Arg::Array(_) => None,
            Arg::Remote(handles) => Some(handles.len()),
            Arg::Proxy(proxy) => Some(proxy.len()),
            Arg::Grid(grid) => Some(grid.len()),
        }
    }

    fn executor(&self) -> Option<&'a Arc<dyn TaskExecutor>> {
        match *self {
            Arg::Local(_) => None,
            Arg::Remote(handles) => Some(handles.executor()),
            Arg::Proxy(proxy) => Some(proxy.handles().executor()),
            Arg::Grid(grid) => Some(grid.executor()),
            Arg::Array(array) => Some(array.executor()),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Arg::Local(_) => "local value",
            Arg::Remote(_) => "handle set",
            Arg::Proxy(_) => "distributed object",
            Arg::Grid(_) => "grid",
            Arg::Array(_) => "chunked array",
        }
    }
}

impl fmt::Debug for Arg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Local(value) => write!(f, "Local({})", value),
            other => write!(f, "{}", other.describe()),
        }
    }
}

impl<'a> From<&'a HandleSet> for Arg<'a> {
    fn from(handles: &'a HandleSet) -> Self {
        Arg::Remote(handles)
    }
}

impl<'a> From<&'a CartesianProxy> for Arg<'a> {
    fn from(proxy: &'a CartesianProxy) -> Self {
        Arg::Proxy(proxy)
    }
}

impl<'a> From<&'a Arc<GridTopology>> for Arg<'a> {
    fn from(grid: &'a Arc<GridTopology>) -> Self {
        Arg::Grid(grid)
    }
}

impl<'a> From<&'a ChunkedArray> for Arg<'a> {
    fn from(array: &'a ChunkedArray) -> Self {
        Arg::Array(array)
    }
}

impl From<Value> for Arg<'_> {
    fn from(value: Value) -> Self {
        Arg::Local(value)
    }
}

macro_rules! local_arg {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg<'_> {
                fn from(value: $ty) -> Self {
                    Arg::Local(Value::from(value))
                }
            }
        )*
    };
}

local_arg!(bool, i64, i32, usize, f64, String, ObjectRef);

impl From<&str> for Arg<'_> {
    fn from(value: &str) -> Self {
        Arg::Local(Value::from(value))
    }
}

/// Positional and keyword arguments of a dispatch, in call order
#[derive(Debug, Clone, Default)]
pub struct CallArgs<'a> {
    pub positional: Vec<Arg<'a>>,
    pub keywords: Vec<(String, Arg<'a>)>,
}

impl<'a> CallArgs<'a> {
    pub fn new() -> Self {
        Self {
            positional: Vec::new(),
            keywords: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Arg<'a>>) -> Self {
        self.positional.push(arg.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, arg: impl Into<Arg<'a>>) -> Self {
        self.keywords.push((key.into(), arg.into()));
        self
    }

    pub fn has_remote(&self) -> bool {
        self.iter().any(Arg::is_remote)
    }

    fn iter(&self) -> impl Iterator<Item = &Arg<'a>> {
        self.positional
            .iter()
            .chain(self.keywords.iter().map(|(_, arg)| arg))
    }

    /// Plain arguments, if none of them is remote
    pub fn to_local_args(&self) -> Option<Args> {
        let local = |arg: &Arg<'a>| match arg {
            Arg::Local(value) => Some(value.clone()),
            _ => None,
        };
        Some(Args {
            positional: self.positional.iter().map(local).collect::<Option<_>>()?,
            keywords: self
                .keywords
                .iter()
                .map(|(key, arg)| local(arg).map(|value| (key.clone(), value)))
                .collect::<Option<_>>()?,
        })
    }
}

/// The enumerated operations a distributed object supports
#[derive(Debug, Clone)]
pub enum Operation {
    Call(String),
    GetAttr(String),
    /// The new value is the first positional argument
    SetAttr(String),
    Construct(Class),
}

impl Operation {
    pub fn call(method: impl Into<String>) -> Self {
        Operation::Call(method.into())
    }

    pub fn get_attr(name: impl Into<String>) -> Self {
        Operation::GetAttr(name.into())
    }

    pub fn set_attr(name: impl Into<String>) -> Self {
        Operation::SetAttr(name.into())
    }

    /// Task name used for submissions and logs
    pub fn task_name(&self) -> String {
        match self {
            Operation::Call(name) => format!("call:{}", name),
            Operation::GetAttr(name) => format!("getattr:{}", name),
            Operation::SetAttr(name) => format!("setattr:{}", name),
            Operation::Construct(class) => format!("construct:{}", class.name()),
        }
    }

    fn apply(&self, receiver: Option<Value>, mut args: Args) -> std::result::Result<Value, RemoteError> {
        match self {
            Operation::Construct(class) => class.instantiate(args).map(Value::Object),
            Operation::Call(method) => target(receiver)?.call(method, args),
            Operation::GetAttr(name) => target(receiver)?.get_attr(name),
            Operation::SetAttr(name) => {
                if args.positional.is_empty() {
                    return Err(RemoteError::MissingArgument("value".to_string()));
                }
                let value = args.positional.swap_remove(0);
                target(receiver)?.set_attr(name, value)?;
                Ok(Value::None)
            }
        }
    }
}

/// The object an operation is applied to
fn target(receiver: Option<Value>) -> std::result::Result<ObjectRef, RemoteError> {
    match receiver {
        Some(Value::Object(object)) => Ok(object),
        Some(other) => Err(RemoteError::type_mismatch("an object", &other)),
        None => Err(RemoteError::MissingArgument("self".to_string())),
    }
}

/// Where one argument of a slot task comes from
#[derive(Debug, Clone)]
enum Piece {
    Local(Value),
    Input(usize),
}

impl Piece {
    fn materialize(&self, inputs: &[Value]) -> Value {
        match self {
            Piece::Local(value) => value.clone(),
            Piece::Input(j) => inputs[*j].clone(),
        }
    }
}

#[derive(Debug)]
struct Template {
    receiver: Option<Piece>,
    positional: Vec<Piece>,
    keywords: Vec<(String, Piece)>,
}

impl Template {
    fn build(&self, inputs: &[Value]) -> (Option<Value>, Args) {
        let receiver = self.receiver.as_ref().map(|p| p.materialize(inputs));
        let args = Args {
            positional: self.positional.iter().map(|p| p.materialize(inputs)).collect(),
            keywords: self
                .keywords
                .iter()
                .map(|(key, p)| (key.clone(), p.materialize(inputs)))
                .collect(),
        };
        (receiver, args)
    }
}

/// Result of a dispatch round: one new handle per slot
#[derive(Debug)]
pub struct Dispatched {
    pub handles: HandleSet,
    pub grid: Option<Arc<GridTopology>>,
}

impl Dispatched {
    /// Wrap the new handles as a distributed object on the same grid
    pub fn into_proxy(self) -> Result<CartesianProxy> {
        match self.grid {
            Some(grid) => Ok(CartesianProxy::new(self.handles, grid)),
            None => Err(no_grid()),
        }
    }
}

fn no_grid() -> QuasarError {
    QuasarError::TopologyMismatch {
        reason: "the dispatch had no grid argument".to_string(),
    }
}

/// Fan `op` out over every slot of its remote arguments.
///
/// # Errors
///
/// - `NoRemoteArgument` when neither `receiver` nor `args` holds a remote argument
/// - `TopologyMismatch` when remote arguments belong to different grids or have
///   different slot counts
/// - `Topology`/`TopologyMismatch` when a handle set argument is not held one
///   slot per task owner
/// - placement errors when an array argument does not fit the grid
pub async fn dispatch<'a>(
    op: Operation,
    receiver: Option<Arg<'a>>,
    args: CallArgs<'a>,
) -> Result<Dispatched> {
    dispatch_round(op, receiver, args, false).await
}

/// Same as [`dispatch`], but fails up front when no argument carries a grid
pub(crate) async fn dispatch_on_grid<'a>(
    op: Operation,
    receiver: Option<Arg<'a>>,
    args: CallArgs<'a>,
) -> Result<CartesianProxy> {
    dispatch_round(op, receiver, args, true)
        .await?
        .into_proxy()
}

pub(crate) async fn dispatch_round<'a>(
    op: Operation,
    receiver: Option<Arg<'a>>,
    args: CallArgs<'a>,
    require_grid: bool,
) -> Result<Dispatched> {
    let all: Vec<&Arg<'a>> = receiver.iter().chain(args.iter()).collect();
    if !all.iter().any(|arg| arg.is_remote()) {
        return Err(QuasarError::NoRemoteArgument);
    }

    let mut grid: Option<&Arc<GridTopology>> = None;
    for candidate in all.iter().filter_map(|arg| arg.grid()) {
        match grid {
            None => grid = Some(candidate),
            Some(known) if known.same_grid(candidate) => {}
            Some(known) => {
                return Err(QuasarError::TopologyMismatch {
                    reason: format!(
                        "arguments live on grid {} (dims {:?}) and grid {} (dims {:?})",
                        known.id(),
                        known.dims(),
                        candidate.id(),
                        candidate.dims()
                    ),
                })
            }
        }
    }

    if require_grid && grid.is_none() {
        return Err(no_grid());
    }

    let counts: Vec<usize> = all.iter().filter_map(|arg| arg.slot_count()).collect();
    let slots = match (grid, counts.first()) {
        (Some(grid), _) => grid.len(),
        (None, Some(first)) => *first,
        (None, None) => {
            return Err(QuasarError::TopologyMismatch {
                reason: "a chunked array argument needs a grid to be split on".to_string(),
            })
        }
    };
    if let Some(bad) = counts.iter().find(|count| **count != slots) {
        return Err(QuasarError::TopologyMismatch {
            reason: format!("arguments have {} and {} slots", slots, bad),
        });
    }
    for arg in &all {
        match (arg, grid) {
            (Arg::Array(array), Some(grid)) => {
                ArrayLayout::from_chunks(grid.dims(), array.chunks().to_vec(), None)?;
            }
            (Arg::Array(_), None) => {
                return Err(QuasarError::TopologyMismatch {
                    reason: "a chunked array argument needs a grid to be split on".to_string(),
                })
            }
            _ => {}
        }
    }

    let executor = all
        .iter()
        .find_map(|arg| arg.executor())
        .ok_or(QuasarError::NoRemoteArgument)?
        .clone();

    // owners of the tasks: the grid points, or the slots of the first handle set.
    // Every handle set must already sit on those owners, slot by slot.
    let mut workers: Option<Vec<WorkerId>> = grid.map(|grid| grid.workers().to_vec());
    for (position, arg) in all.iter().enumerate() {
        let handles = match arg {
            Arg::Remote(handles) => *handles,
            _ => continue,
        };
        let owners = handles.workers().await?;
        if let Some(expected) = &workers {
            if *expected != owners {
                return Err(QuasarError::TopologyMismatch {
                    reason: format!(
                        "argument {} is held by {:?}, but its tasks run on {:?}",
                        position,
                        owners.iter().map(WorkerId::as_str).collect::<Vec<_>>(),
                        expected.iter().map(WorkerId::as_str).collect::<Vec<_>>()
                    ),
                });
            }
        } else {
            workers = Some(owners);
        }
    }
    let workers = workers.ok_or(QuasarError::NoRemoteArgument)?;

    let mut columns = Columns::default();
    let receiver_piece = match &receiver {
        Some(arg) => Some(columns.piece(arg, grid).await?),
        None => None,
    };
    let mut positional = Vec::with_capacity(args.positional.len());
    for arg in &args.positional {
        positional.push(columns.piece(arg, grid).await?);
    }
    let mut keywords = Vec::with_capacity(args.keywords.len());
    for (key, arg) in &args.keywords {
        keywords.push((key.clone(), columns.piece(arg, grid).await?));
    }
    let columns = columns.0;

    let template = Arc::new(Template {
        receiver: receiver_piece,
        positional,
        keywords,
    });
    let name = op.task_name();
    let op = Arc::new(op);
    let task = Task::new(name.clone(), move |inputs| {
        let (receiver, args) = template.build(&inputs);
        op.apply(receiver, args)
    });

    debug!(
        operation = %name,
        slots,
        remote = columns.len(),
        "Dispatching one task per slot"
    );

    let mut handles = Vec::with_capacity(slots);
    for (index, worker) in workers.iter().enumerate() {
        let inputs: Vec<HandleId> = columns.iter().map(|column| column[index]).collect();
        handles.push(executor.submit(task.clone(), &inputs, Some(worker)).await?);
    }

    Ok(Dispatched {
        handles: HandleSet::dispatched(executor, handles, workers),
        grid: grid.cloned(),
    })
}

/// Per-slot input handles, one column per remote argument
#[derive(Default)]
struct Columns(Vec<Vec<HandleId>>);

impl Columns {
    async fn piece(&mut self, arg: &Arg<'_>, grid: Option<&Arc<GridTopology>>) -> Result<Piece> {
        let column = match (arg, grid) {
            (Arg::Local(value), _) => return Ok(Piece::Local(value.clone())),
            (Arg::Remote(handles), _) => handles.handles(),
            (Arg::Proxy(proxy), _) => proxy.handles().handles(),
            (Arg::Grid(grid), _) => grid.handles().handles(),
            (Arg::Array(array), Some(grid)) => grid.disassemble(array, None).await?.handles(),
            (Arg::Array(_), None) => {
                return Err(QuasarError::TopologyMismatch {
                    reason: "a chunked array argument needs a grid to be split on".to_string(),
                })
            }
        };
        self.0.push(column);
        Ok(Piece::Input(self.0.len() - 1))
    }
}

/// A distributed object: one instance per grid point
pub struct CartesianProxy {
    handles: HandleSet,
    grid: Arc<GridTopology>,
}

impl CartesianProxy {
    pub fn new(handles: HandleSet, grid: Arc<GridTopology>) -> Self {
        Self { handles, grid }
    }

    /// Build one instance of `class` per grid point.
    ///
    /// At least one argument must be remote; it decides the grid.
    pub async fn construct(class: Class, args: CallArgs<'_>) -> Result<Self> {
        dispatch_on_grid(Operation::Construct(class), None, args).await
    }

    pub fn handles(&self) -> &HandleSet {
        &self.handles
    }

    pub fn grid(&self) -> &Arc<GridTopology> {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn workers(&self) -> &[WorkerId] {
        self.grid.workers()
    }

    pub async fn call(&self, method: &str, args: CallArgs<'_>) -> Result<CartesianProxy> {
        dispatch_on_grid(Operation::call(method), Some(Arg::Proxy(self)), args).await
    }

    pub async fn get_attr(&self, name: &str) -> Result<CartesianProxy> {
        dispatch_on_grid(Operation::get_attr(name), Some(Arg::Proxy(self)), CallArgs::new()).await
    }

    /// Assign `name` on every instance and wait until every slot acknowledged it
    pub async fn set_attr(&self, name: &str, value: impl Into<Arg<'_>>) -> Result<()> {
        let round = dispatch(
            Operation::set_attr(name),
            Some(Arg::Proxy(self)),
            CallArgs::new().arg(value),
        )
        .await?;
        round.handles.wait().await
    }

    /// Per-slot values, in slot order
    pub async fn results(&self) -> Result<Vec<Value>> {
        self.handles.results().await
    }
}

impl fmt::Debug for CartesianProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartesianProxy")
            .field("grid", &self.grid.id())
            .field("handles", &self.handles)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::Comm;
    use quasar_core_interface::RemoteObject;
    use quasar_local::{ClusterConfig, LocalCluster};

    #[derive(Debug)]
    struct Counter {
        count: i64,
    }

    impl RemoteObject for Counter {
        fn type_name(&self) -> &'static str {
            "Counter"
        }

        fn get_attr(&self, name: &str) -> std::result::Result<Value, RemoteError> {
            match name {
                "count" => Ok(Value::Int(self.count)),
                _ => Err(RemoteError::AttributeNotFound {
                    type_name: "Counter".to_string(),
                    name: name.to_string(),
                }),
            }
        }

        fn set_attr(&mut self, name: &str, value: Value) -> std::result::Result<(), RemoteError> {
            match (name, value.as_int()) {
                ("count", Some(count)) => {
                    self.count = count;
                    Ok(())
                }
                _ => Err(RemoteError::Failed(format!("cannot set {}", name))),
            }
        }

        fn call(&mut self, method: &str, args: Args) -> std::result::Result<Value, RemoteError> {
            match method {
                "add" => {
                    let step = args.require(0, "step")?.as_int().unwrap_or_default();
                    self.count += step;
                    Ok(Value::Int(self.count))
                }
                _ => Err(RemoteError::MethodNotFound {
                    type_name: "Counter".to_string(),
                    name: method.to_string(),
                }),
            }
        }
    }

    fn counter() -> Class {
        Class::new("Counter", |args| {
            let start = match args.lookup(0, "start") {
                Some(value) => value.as_int().unwrap_or_default(),
                None => 0,
            };
            Ok(Box::new(Counter { count: start }))
        })
    }

    async fn cart(cluster: &Arc<LocalCluster>, dims: &[usize]) -> Arc<GridTopology> {
        let executor: Arc<dyn TaskExecutor> = cluster.clone();
        let comm = Comm::create(executor.clone(), &executor.workers()).await.unwrap();
        comm.create_cart(dims, &vec![false; dims.len()]).await.unwrap()
    }

    async fn cluster(n: usize) -> Arc<LocalCluster> {
        Arc::new(LocalCluster::start(ClusterConfig::with_workers(n)).await.unwrap())
    }

    #[tokio::test]
    async fn test_no_remote_argument() {
        let err = dispatch(Operation::call("add"), Some(Arg::Local(1.into())), CallArgs::new().arg(2))
            .await
            .unwrap_err();
        assert_eq!(err, QuasarError::NoRemoteArgument);
    }

    #[tokio::test]
    async fn test_construct_and_call_stay_on_grid_points() {
        let cluster = cluster(3).await;
        let grid = cart(&cluster, &[3]).await;
        let ranks = dispatch(Operation::get_attr("rank"), Some(Arg::Grid(&grid)), CallArgs::new())
            .await
            .unwrap()
            .into_proxy()
            .unwrap();

        let counters = CartesianProxy::construct(counter(), CallArgs::new().kwarg("start", &ranks))
            .await
            .unwrap();
        assert_eq!(counters.handles().workers().await.unwrap(), grid.workers());

        let added = counters.call("add", CallArgs::new().arg(10)).await.unwrap();
        assert_eq!(
            added.results().await.unwrap(),
            vec![Value::Int(10), Value::Int(11), Value::Int(12)]
        );
    }

    #[tokio::test]
    async fn test_set_attr_is_dispatched_to_every_slot() {
        let cluster = cluster(2).await;
        let grid = cart(&cluster, &[2]).await;
        let counters = CartesianProxy::construct(counter(), CallArgs::new().kwarg("comm", &grid))
            .await
            .unwrap();
        counters.set_attr("count", 7).await.unwrap();
        let counts = counters.get_attr("count").await.unwrap().results().await.unwrap();
        assert_eq!(counts, vec![Value::Int(7), Value::Int(7)]);
    }

    #[tokio::test]
    async fn test_mixing_grids_is_rejected_before_submitting() {
        let cluster = cluster(2).await;
        let first = cart(&cluster, &[2]).await;
        let second = cart(&cluster, &[2]).await;
        let a = CartesianProxy::construct(counter(), CallArgs::new().kwarg("comm", &first))
            .await
            .unwrap();
        let b = CartesianProxy::construct(counter(), CallArgs::new().kwarg("comm", &second))
            .await
            .unwrap();

        let before = cluster.submitted_tasks();
        let err = a.call("add", CallArgs::new().arg(&b)).await.unwrap_err();
        assert!(matches!(err, QuasarError::TopologyMismatch { .. }));
        assert_eq!(cluster.submitted_tasks(), before);
    }

    #[tokio::test]
    async fn test_slot_count_mismatch() {
        let cluster = cluster(2).await;
        let grid = cart(&cluster, &[2]).await;
        let executor: Arc<dyn TaskExecutor> = cluster.clone();
        let single = HandleSet::new(
            executor.clone(),
            executor.scatter(vec![1.into()], &executor.workers(), false).await.unwrap(),
        );
        let err = dispatch(
            Operation::Construct(counter()),
            None,
            CallArgs::new().arg(&grid).arg(&single),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, QuasarError::TopologyMismatch { .. }));
    }

    #[tokio::test]
    async fn test_remote_failure_fails_the_round() {
        let cluster = cluster(2).await;
        let grid = cart(&cluster, &[2]).await;
        let counters = CartesianProxy::construct(counter(), CallArgs::new().kwarg("comm", &grid))
            .await
            .unwrap();
        let broken = counters.call("explode", CallArgs::new()).await.unwrap();
        let err = broken.results().await.unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Remote);
        assert!(err.to_string().contains("explode"));
    }

    #[test]
    fn test_to_local_args() {
        let args = CallArgs::new().arg(1).kwarg("name", "x");
        let local = args.to_local_args().unwrap();
        assert_eq!(local.get(0), Some(&Value::Int(1)));
        assert_eq!(local.keyword("name"), Some(&Value::from("x")));
        assert!(!args.has_remote());
    }
}
