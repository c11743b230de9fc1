//! Shared fixtures for the integration tests

#![allow(dead_code)]

use quasar::{
    Args, Block, Class, DType, GridTopology, RemoteError, RemoteObject, Session, SessionConfig,
    Value,
};
use std::sync::Arc;

/// A per-grid-point object that knows its rank
#[derive(Debug)]
pub struct Field {
    rank: i64,
    value: Value,
}

impl RemoteObject for Field {
    fn type_name(&self) -> &'static str {
        "Field"
    }

    fn get_attr(&self, name: &str) -> Result<Value, RemoteError> {
        match name {
            "rank" => Ok(Value::Int(self.rank)),
            "value" => Ok(self.value.clone()),
            "ten" => Ok(Value::Int(10)),
            _ => Err(RemoteError::AttributeNotFound {
                type_name: "Field".to_string(),
                name: name.to_string(),
            }),
        }
    }

    fn set_attr(&mut self, name: &str, value: Value) -> Result<(), RemoteError> {
        match name {
            "value" => {
                self.value = value;
                Ok(())
            }
            _ => Err(RemoteError::Failed(format!("'{}' is read-only", name))),
        }
    }

    fn call(&mut self, method: &str, args: Args) -> Result<Value, RemoteError> {
        match method {
            "values" => Ok(Value::Int(self.rank)),
            "five" => Ok(Value::Int(5)),
            // 5 everywhere except on rank 2
            "almost_five" => Ok(Value::Int(if self.rank == 2 { 6 } else { 5 })),
            "combine" => {
                let first = args.require(0, "first")?.clone();
                let scale = args.keyword("scale").cloned().unwrap_or(Value::Int(1));
                Ok(Value::Tuple(vec![Value::Int(self.rank), first, scale]))
            }
            "local_block" => {
                let shape = args.require(0, "shape")?.to_usizes()?;
                Ok(Value::Block(Block::full(DType::Int64, &shape, self.rank as f64)))
            }
            "block_sum" => match args.require(0, "block")?.as_block() {
                Some(block) => block.sum(),
                None => Err(RemoteError::type_mismatch("an array block", &args.positional[0])),
            },
            "fail_on" => {
                let rank = args.require(0, "rank")?.as_int().unwrap_or(-1);
                if rank == self.rank {
                    Err(RemoteError::Failed(format!("rank {} refused", rank)))
                } else {
                    Ok(Value::None)
                }
            }
            _ => Err(RemoteError::MethodNotFound {
                type_name: "Field".to_string(),
                name: method.to_string(),
            }),
        }
    }
}

/// `Field(value=0, comm=None)`; the rank is read from `comm` when given
pub fn field_class() -> Class {
    Class::new("Field", |args| {
        let rank = match args.keyword("comm") {
            Some(Value::Object(comm)) => comm.get_attr("rank")?.as_int().unwrap_or(0),
            Some(other) => return Err(RemoteError::type_mismatch("a communicator", other)),
            None => 0,
        };
        let value = args.lookup(0, "value").cloned().unwrap_or(Value::Int(0));
        Ok(Box::new(Field { rank, value }))
    })
}

pub async fn session(workers: usize) -> Session {
    Session::local(SessionConfig::with_workers(workers))
        .await
        .expect("local session")
}

pub async fn grid(session: &Session, dims: &[usize]) -> Arc<GridTopology> {
    session.create_cart(dims, None).await.expect("grid")
}

/// Tasks accepted by the session's local pool so far
pub fn submitted(session: &Session) -> u64 {
    session
        .cluster()
        .map(|cluster| cluster.submitted_tasks())
        .unwrap_or_default()
}
