//! The DDL/DML converter: translates MySQL `CREATE TABLE`/`ALTER TABLE`
//! statements and row tuples into ClickHouse form.

mod ddl;
mod rows;
mod schema;
mod type_map;

pub use ddl::{
    apply_alter_to_schema, convert_alter, parse_source_create, table_name_from_sql, to_target_schema,
};
pub use rows::convert_rows;
pub use schema::{FieldDef, TableStructure};
