pub mod delete_record;
pub mod insert_record;
pub mod read_record;
pub mod scan_records;
pub mod update_record;

pub use delete_record::{
    DeleteRecordOperation, DeleteRecordOperationOutcome, DeleteRecordOperationRequest,
};
pub use insert_record::{
    InsertRecordOperation, InsertRecordOperationRequest, InsertRecordOperationResult,
};
pub use read_record::{
    ReadObserver, ReadRecordOperation, ReadRecordOperationOutcome, ReadRecordOperationRequest,
    ReadRecordOperationResult,
};
pub use scan_records::{
    ScanRecordsOperation, ScanRecordsOperationRequest, ScanRecordsOperationResult,
};
pub use update_record::{
    UpdateRecordOperation, UpdateRecordOperationOutcome, UpdateRecordOperationRequest,
};
