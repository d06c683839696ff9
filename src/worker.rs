//! Worker-side runtime.
//!
//! A worker process's `main` calls [`run`] with a [`CallableRegistry`]. The loop reads one framed
//! chunk from stdin, runs each of its tasks against the matching callable in order, and writes one
//! framed result chunk back to stdout before looping — then loops. It never exits on its own
//! except when stdin is closed (the supervisor is terminating it) or a callable deliberately
//! aborts the process to simulate a crash; both are indistinguishable to the supervisor by
//! content, only by the absence of a result frame.

use tokio::io::{stdin, stdout};

use crate::callable::{CallableOutcome, CallableRegistry};
use crate::codec::{Codec, JsonCodec};
use crate::protocol::{read_frame, write_frame, ResultFrame, ResultItem, Status, TaskFrame, TaskItem};
use crate::task::TaskId;

/// Run the worker loop against stdin/stdout using the default [`JsonCodec`]. Returns once stdin
/// is closed (a clean shutdown request from the supervisor).
pub async fn run(registry: CallableRegistry) -> std::io::Result<()> {
    run_with_codec(registry, JsonCodec).await
}

/// Same as [`run`] but with a caller-supplied [`Codec`].
pub async fn run_with_codec<C: Codec>(
    registry: CallableRegistry,
    codec: C,
) -> std::io::Result<()> {
    let mut input = stdin();
    let mut output = stdout();

    loop {
        let Some(chunk) = read_frame::<_, TaskFrame>(&mut input).await? else {
            // Clean EOF: the supervisor closed our stdin as part of termination.
            return Ok(());
        };

        let items = chunk
            .items
            .into_iter()
            .map(|item| handle_item(&registry, &codec, item))
            .collect();
        let frame = ResultFrame {
            chunk_id: chunk.chunk_id,
            items,
        };
        write_frame(&mut output, &frame).await?;
    }
}

fn handle_item<C: Codec>(registry: &CallableRegistry, codec: &C, item: TaskItem) -> ResultItem {
    let args = match codec.decode(&item.args) {
        Ok(args) => args,
        Err(err) => return serialization_error_item(item.task_id, "input", err.detail),
    };

    let Some(callable) = registry.get(&item.callable_ref) else {
        return serialization_error_item(
            item.task_id,
            "input",
            format!("unknown callable {}", item.callable_ref),
        );
    };

    match callable(args) {
        CallableOutcome::Ok(value) => match codec.encode(&value) {
            Ok(payload) => ResultItem {
                task_id: item.task_id,
                status: Status::Ok,
                payload,
            },
            Err(err) => serialization_error_item(item.task_id, "output", err.detail),
        },
        CallableOutcome::UserError(message) => ResultItem {
            task_id: item.task_id,
            status: Status::UserError,
            payload: message.into_bytes(),
        },
        CallableOutcome::EncodeFailure(detail) => {
            serialization_error_item(item.task_id, "output", detail)
        }
    }
}

fn serialization_error_item(task_id: TaskId, kind: &str, detail: String) -> ResultItem {
    ResultItem {
        task_id,
        status: Status::SerializationError,
        payload: format!("{kind}: {detail}").into_bytes(),
    }
}
