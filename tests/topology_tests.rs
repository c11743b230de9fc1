/*!
 * Integration tests for communicators and grid discovery
 */

mod common;

use quasar::{
    Args, GridKey, GridTopology, HandleSet, ObjectRef, QuasarError, RemoteError, RemoteObject,
    TaskExecutor, Value, WorkerId, WorkerSelection,
};
use std::collections::HashSet;

#[tokio::test]
async fn test_coordinates_are_distinct_for_every_grid_shape() {
    let session = common::session(4).await;
    for dims in [vec![4], vec![2, 2], vec![2, 1, 2], vec![1, 4]] {
        let grid = common::grid(&session, &dims).await;
        assert_eq!(grid.coords().len(), 4);
        let distinct: HashSet<_> = grid.coords().iter().collect();
        assert_eq!(distinct.len(), 4, "coords of {:?} collide", dims);
        assert!(grid.coords().iter().all(|c| c.len() == dims.len()));
    }
}

#[tokio::test]
async fn test_workers_and_ranks_follow_slots() {
    let session = common::session(3).await;
    let grid = common::grid(&session, &[3]).await;
    assert_eq!(grid.workers(), session.workers().as_slice());
    assert_eq!(
        grid.ranks_workers(),
        vec![
            (0, WorkerId::new("local-0")),
            (1, WorkerId::new("local-1")),
            (2, WorkerId::new("local-2"))
        ]
    );
    for (rank, worker) in grid.ranks_workers() {
        assert_eq!(grid.index(&GridKey::Rank(rank)).unwrap(), rank);
        assert_eq!(grid.index(&GridKey::Worker(worker)).unwrap(), rank);
    }
}

#[tokio::test]
async fn test_coordinate_lookup_reconciles_arity() {
    let session = common::session(2).await;
    let grid = common::grid(&session, &[2]).await;
    assert_eq!(grid.index(&GridKey::from(vec![1, 0, 0])).unwrap(), 1);
    assert_eq!(grid.index(&GridKey::from(vec![1])).unwrap(), 1);
    assert!(matches!(
        grid.index(&GridKey::from(vec![1, 0, 1])),
        Err(QuasarError::KeyNotFound(_))
    ));
    assert!(matches!(
        grid.index(&GridKey::from(vec![2])),
        Err(QuasarError::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn test_shared_worker_is_topology_error() {
    let session = common::session(2).await;
    let executor = session.executor().clone();
    let worker = executor.workers()[0].clone();
    let handles = executor
        .scatter(vec![Value::Int(0), Value::Int(1)], &[worker], false)
        .await
        .unwrap();

    let before = common::submitted(&session);
    let err = GridTopology::discover(HandleSet::new(executor.clone(), handles))
        .await
        .unwrap_err();
    assert!(matches!(err, QuasarError::Topology(_)));
    assert_eq!(common::submitted(&session), before);
}

/// Reports a two-dimensional coordinate on a one-dimensional grid
#[derive(Debug)]
struct SkewedCart {
    rank: i64,
}

impl RemoteObject for SkewedCart {
    fn type_name(&self) -> &'static str {
        "SkewedCart"
    }

    fn get_attr(&self, name: &str) -> Result<Value, RemoteError> {
        match name {
            "rank" => Ok(Value::Int(self.rank)),
            _ => Err(RemoteError::Failed(name.to_string())),
        }
    }

    fn set_attr(&mut self, name: &str, _value: Value) -> Result<(), RemoteError> {
        Err(RemoteError::Failed(name.to_string()))
    }

    fn call(&mut self, method: &str, _args: Args) -> Result<Value, RemoteError> {
        match method {
            "get_topo" => Ok(Value::Tuple(vec![
                Value::from_usizes(&[2]),
                Value::from_bools(&[false]),
                Value::from_usizes(&[0]),
            ])),
            "get_coords" => Ok(Value::from_usizes(&[self.rank as usize, 0])),
            _ => Err(RemoteError::Failed(method.to_string())),
        }
    }
}

#[tokio::test]
async fn test_coordinate_arity_mismatch_is_topology_error() {
    let session = common::session(2).await;
    let executor = session.executor().clone();
    let carts = (0..2)
        .map(|rank| Value::Object(ObjectRef::new(Box::new(SkewedCart { rank }))))
        .collect();
    let handles = executor
        .scatter(carts, &executor.workers(), false)
        .await
        .unwrap();

    let err = GridTopology::discover(HandleSet::new(executor.clone(), handles))
        .await
        .unwrap_err();
    match err {
        QuasarError::Topology(msg) => assert!(msg.contains("arity"), "{}", msg),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_dims_product_must_match_communicator() {
    let session = common::session(4).await;
    let comm = session
        .create_comm(&WorkerSelection::count(3))
        .await
        .unwrap();
    assert_eq!(comm.size(), 3);

    let before = common::submitted(&session);
    let err = comm.create_cart(&[2, 2], &[false, false]).await.unwrap_err();
    assert!(matches!(err, QuasarError::Topology(_)));
    assert_eq!(common::submitted(&session), before);
}

#[tokio::test]
async fn test_periodic_neighbours() {
    let session = common::session(4).await;
    let grid = session.create_cart(&[2, 2], Some(&[true, false])).await.unwrap();
    // rank 0 sits at (0, 0)
    assert_eq!(grid.shift(0, 0, -1).unwrap(), Some(2));
    assert_eq!(grid.shift(0, 1, 1).unwrap(), Some(1));
    assert_eq!(grid.shift(1, 1, 1).unwrap(), None);
}

#[tokio::test]
async fn test_selecting_more_workers_than_available() {
    let session = common::session(2).await;
    let err = session
        .create_comm(&WorkerSelection::count(5))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QuasarError::PoolAssembly {
            expected: 5,
            connected: 2
        }
    ));
}
