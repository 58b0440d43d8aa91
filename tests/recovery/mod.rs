mod atomicity;
mod background_undo;
mod checkpoint;
mod durability;
mod savepoints;
mod workload;
