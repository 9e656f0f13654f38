// ABOUTME: Table layout of the analytics store and its idempotent DDL
// ABOUTME: CREATE TABLE IF NOT EXISTS plus ADD COLUMN IF NOT EXISTS for drift-prone columns

use crate::entity::EntityKind;
use crate::utils::quote_ident;

/// Schema every analytics table lives in.
pub const SCHEMA: &str = "public";

/// Name of the natural-key column shared by every table.
pub const NATURAL_KEY: &str = "origen_id";

/// A writable column: its name, DDL type and the cast applied to its parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ddl: &'static str,
    pub cast: &'static str,
}

const fn col(name: &'static str, ddl: &'static str, cast: &'static str) -> Column {
    Column { name, ddl, cast }
}

const ORIGEN_ID: Column = col(NATURAL_KEY, "VARCHAR(255) UNIQUE", "varchar");

const CLIENT_COLUMNS: &[Column] = &[
    ORIGEN_ID,
    col("nombre", "VARCHAR(255)", "varchar"),
    col("email", "VARCHAR(255)", "varchar"),
    col("telefono", "VARCHAR(50)", "varchar"),
    col("fecha_registro", "TIMESTAMPTZ", "timestamptz"),
];

const AGENT_COLUMNS: &[Column] = &[
    ORIGEN_ID,
    col("nombre", "VARCHAR(255)", "varchar"),
    col("email", "VARCHAR(255)", "varchar"),
    col("telefono", "VARCHAR(50)", "varchar"),
];

const SERVICE_COLUMNS: &[Column] = &[
    ORIGEN_ID,
    col("destino_ciudad", "VARCHAR(255)", "varchar"),
    col("destino_pais", "VARCHAR(255)", "varchar"),
    col("precio_costo", "NUMERIC(12,2)", "numeric"),
];

const PACKAGE_COLUMNS: &[Column] = &[
    ORIGEN_ID,
    col("destino_principal", "VARCHAR(255)", "varchar"),
    col("precio_total_venta", "NUMERIC(12,2)", "numeric"),
];

const SALE_COLUMNS: &[Column] = &[
    ORIGEN_ID,
    col("cliente_id", "INTEGER REFERENCES clientes(id)", "bigint"),
    col("agente_id", "INTEGER REFERENCES agentes(id)", "bigint"),
    col("estado", "VARCHAR(50)", "varchar"),
    col("monto", "NUMERIC(12,2)", "numeric"),
    col("fecha_venta", "DATE", "date"),
    col("puntuacion_satisfaccion", "INTEGER", "integer"),
];

const SALE_LINE_COLUMNS: &[Column] = &[
    ORIGEN_ID,
    col("venta_id", "INTEGER REFERENCES ventas(id)", "bigint"),
    col("servicio_id", "INTEGER REFERENCES servicios(id)", "bigint"),
    col("paquete_id", "INTEGER REFERENCES paquetes_turisticos(id)", "bigint"),
    col("descripcion", "TEXT", "text"),
    col("cantidad", "INTEGER", "integer"),
    col("precio_unitario", "NUMERIC(12,2)", "numeric"),
    col("subtotal", "NUMERIC(12,2)", "numeric"),
];

/// Writable columns of the table for `kind`, in `TargetRecord::sql_values` order.
pub fn columns(kind: EntityKind) -> &'static [Column] {
    match kind {
        EntityKind::Client => CLIENT_COLUMNS,
        EntityKind::Agent => AGENT_COLUMNS,
        EntityKind::Service => SERVICE_COLUMNS,
        EntityKind::TourPackage => PACKAGE_COLUMNS,
        EntityKind::Sale => SALE_COLUMNS,
        EntityKind::SaleLine => SALE_LINE_COLUMNS,
    }
}

/// Columns that older deployments of the table may lack.
fn drift_columns(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Service => &["destino_pais"],
        EntityKind::Sale => &[NATURAL_KEY],
        EntityKind::SaleLine => &[NATURAL_KEY, "servicio_id", "paquete_id"],
        _ => &[],
    }
}

fn qualified(kind: EntityKind) -> String {
    format!("{}.{}", quote_ident(SCHEMA), quote_ident(kind.table()))
}

/// `CREATE TABLE IF NOT EXISTS` for the table backing `kind`.
pub fn create_table_sql(kind: EntityKind) -> String {
    let mut definitions = vec![format!("{} SERIAL PRIMARY KEY", quote_ident("id"))];
    definitions.extend(
        columns(kind)
            .iter()
            .map(|c| format!("{} {}", quote_ident(c.name), c.ddl)),
    );

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified(kind),
        definitions.join(", ")
    )
}

/// `ALTER TABLE ... ADD COLUMN IF NOT EXISTS` for each drift-prone column.
///
/// The natural key is re-added without its UNIQUE constraint; a separate
/// unique index covers tables created before the column existed.
pub fn add_missing_columns_sql(kind: EntityKind) -> Vec<String> {
    let mut statements = Vec::new();

    for name in drift_columns(kind) {
        let Some(column) = columns(kind).iter().find(|c| c.name == *name) else {
            continue;
        };
        let ddl = if column.name == NATURAL_KEY {
            "VARCHAR(255)"
        } else {
            column.ddl
        };
        statements.push(format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
            qualified(kind),
            quote_ident(column.name),
            ddl
        ));
        if column.name == NATURAL_KEY {
            statements.push(format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&format!("{}_origen_id_key", kind.table())),
                qualified(kind),
                quote_ident(NATURAL_KEY)
            ));
        }
    }

    statements
}

/// Every statement needed to prepare `kind`, excluding its dependencies.
pub fn prepare_statements(kind: EntityKind) -> Vec<String> {
    let mut statements = vec![create_table_sql(kind)];
    statements.extend(add_missing_columns_sql(kind));
    statements
}

/// Build the per-record merge statement for `kind`.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO "public"."ventas" ("origen_id", "estado")
/// VALUES ($1::varchar, $2::varchar)
/// ON CONFLICT ("origen_id") DO UPDATE SET "estado" = EXCLUDED."estado"
/// RETURNING id::bigint, (xmax = 0) AS inserted
/// ```
pub fn upsert_sql(kind: EntityKind) -> String {
    build_upsert_query(SCHEMA, kind.table(), NATURAL_KEY, columns(kind))
}

fn build_upsert_query(schema: &str, table: &str, conflict_column: &str, columns: &[Column]) -> String {
    let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c.name)).collect();

    // Explicit casts keep parameter types independent of the table's declared types
    let placeholders: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(idx, c)| format!("${}::{}", idx + 1, c.cast))
        .collect();

    let update_columns: Vec<String> = columns
        .iter()
        .filter(|c| c.name != conflict_column)
        .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c.name), quote_ident(c.name)))
        .collect();

    let update_clause = if update_columns.is_empty() {
        // DO NOTHING would suppress RETURNING for existing rows
        format!(
            "DO UPDATE SET {} = EXCLUDED.{}",
            quote_ident(conflict_column),
            quote_ident(conflict_column)
        )
    } else {
        format!("DO UPDATE SET {}", update_columns.join(", "))
    };

    format!(
        "INSERT INTO {}.{} ({}) VALUES ({}) ON CONFLICT ({}) {} RETURNING id::bigint, (xmax = 0) AS inserted",
        quote_ident(schema),
        quote_ident(table),
        quoted_columns.join(", "),
        placeholders.join(", "),
        quote_ident(conflict_column),
        update_clause
    )
}

/// `SELECT origen_id, id` over the table for `kind`, skipping null keys.
pub fn identifier_scan_sql(kind: EntityKind) -> String {
    format!(
        "SELECT {key}::text, id::bigint FROM {table} WHERE {key} IS NOT NULL",
        key = quote_ident(NATURAL_KEY),
        table = qualified(kind)
    )
}

pub fn count_sql(kind: EntityKind) -> String {
    format!("SELECT COUNT(*)::bigint FROM {}", qualified(kind))
}
