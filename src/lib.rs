//! A fine-grained, push-pull reactive signal graph.
//!
//! Five node kinds share one graph core (`node`, `root`, `scheduler`,
//! `ownership`): [`State`](signal::Signal), [`Sensor`](sensor::Sensor),
//! [`Memo`](memo::Memo), [`Task`](task::Task) and [`Effect`]. Writes
//! (`propagate`) eagerly flag downstream nodes `DIRTY`/`CHECK`; reads
//! (`refresh`) lazily recompute only what is actually observed. Three
//! composites (`Store`, `List`, `Collection`) build record-shaped,
//! array-shaped, and externally-driven/derived keyed-sequence values out of
//! the five kinds rather than introducing new node variants.
//!
//! Everything here is confined to a single thread: exactly one [`Root`] is
//! active per thread at a time (see [`create_root`]), and all the "global"
//! mutable state the design calls out — the active sink, the active owner,
//! the effect queue, the batch depth — lives on that `Root` rather than in
//! scattered thread-locals.
//!
//! ```
//! # use reactive_graph::*;
//! let handle = create_root(|| {
//!     let count = create_signal(0);
//!     let doubled = create_memo(move |_: Option<i32>| count.get() * 2);
//!     create_effect(move || {
//!         println!("doubled = {}", doubled.get());
//!     });
//!     count.set(21);
//! });
//! handle.dispose();
//! ```

#![warn(missing_docs)]

mod collection;
mod diff;
mod effect;
mod error;
mod list;
mod memo;
mod node;
mod ownership;
mod root;
mod scheduler;
mod sensor;
mod signal;
mod store;
mod task;

pub use collection::{
    create_collection, Collection, CollectionApplier, CollectionChange, CollectionOptions,
};
pub use effect::{create_effect, EffectHandle};
pub use error::{ReactiveError, Result};
pub use list::{create_list, create_list_with_prefix, List};
pub use memo::{create_memo, create_memo_with, Memo};
pub use ownership::{create_scope, Scope};
pub use root::{create_root, on_cleanup, Root, RootHandle};
pub use scheduler::{batch, untrack};
pub use sensor::{create_sensor, create_sensor_with, Sensor, SensorSetter};
pub use signal::{create_signal, create_signal_with, Signal, StateOptions};
pub use store::{create_store, Store};
pub use task::{create_task, create_task_with, Task};
