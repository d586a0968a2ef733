//! Document model: ids, dates, field-name rules and copies

mod model;

pub use model::{
    as_date_millis, as_datetime, check_key, check_object, create_new_id, date_value,
    deep_copy, deep_copy_strict, document_id, is_date, is_primitive, now_value,
    CREATED_AT_FIELD, DATE_KEY, DELETED_KEY, ID_FIELD, INDEX_CREATED_KEY, INDEX_REMOVED_KEY,
    UPDATED_AT_FIELD,
};
