mod block;
mod swap_event;

pub use block::BlockRecord;
pub use swap_event::{LedgerEvent, PairVolume, SwapEventRecord, TxStatus, MAX_STORED_AMOUNT};
