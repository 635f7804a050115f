//! Customer and invoice queries (read-only business data)

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::types::{Customer, CustomerPredicate, Operator, OverdueInvoice};

const CUSTOMER_COLUMNS: &str = r#"
    c.id, c.customer_name, c.mobile_no, c.customer_type, c.customer_group,
    c.territory, c.gender, c.religion, c.profession, c.date_of_birth, c.sms_enabled
"#;

const HAS_MOBILE: &str = "c.mobile_no IS NOT NULL AND btrim(c.mobile_no) <> ''";

/// Bound value of a predicate
#[derive(Debug, Clone, PartialEq)]
enum Bind {
    Text(String),
    List(Vec<String>),
}

/// Render one predicate as a SQL condition. Columns are compared as text with
/// NULL read as the empty string, matching in-memory evaluation.
fn predicate_sql(predicate: &CustomerPredicate, param: usize) -> (String, Option<Bind>) {
    let column = format!("COALESCE(c.{}::text, '')", predicate.field.as_str());

    match predicate.op {
        Operator::IsSet => (format!("{} <> ''", column), None),
        Operator::IsNotSet => (format!("{} = ''", column), None),
        Operator::In | Operator::NotIn => (
            format!("{} {}(${})", column, predicate.op.sql(), param),
            Some(Bind::List(predicate.value_list())),
        ),
        _ => (
            format!("{} {} ${}", column, predicate.op.sql(), param),
            Some(Bind::Text(crate::types::value_text(&predicate.value))),
        ),
    }
}

fn where_clause(predicates: &[CustomerPredicate]) -> (String, Vec<Bind>) {
    let mut conditions = Vec::with_capacity(predicates.len());
    let mut binds = Vec::new();

    for predicate in predicates {
        let (condition, bind) = predicate_sql(predicate, binds.len() + 1);
        conditions.push(condition);
        binds.extend(bind);
    }

    if conditions.is_empty() {
        ("TRUE".to_string(), binds)
    } else {
        (conditions.join(" AND "), binds)
    }
}

/// Get a customer by platform id
pub async fn get_customer(pool: &PgPool, id: &str) -> Result<Option<Customer>> {
    let customer = sqlx::query_as::<_, Customer>(&format!(
        "SELECT {} FROM customers c WHERE c.id = $1",
        CUSTOMER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(customer)
}

/// Customers matching all predicates
pub async fn find_customers(pool: &PgPool, predicates: &[CustomerPredicate]) -> Result<Vec<Customer>> {
    let (where_sql, binds) = where_clause(predicates);
    let sql = format!(
        "SELECT {} FROM customers c WHERE {} ORDER BY c.id",
        CUSTOMER_COLUMNS, where_sql
    );

    let mut query = sqlx::query_as::<_, Customer>(&sql);
    for bind in binds {
        query = match bind {
            Bind::Text(value) => query.bind(value),
            Bind::List(values) => query.bind(values),
        };
    }

    let customers = query.fetch_all(pool).await?;
    Ok(customers)
}

pub async fn first_customer_with_mobile(pool: &PgPool) -> Result<Option<Customer>> {
    let customer = sqlx::query_as::<_, Customer>(&format!(
        "SELECT {} FROM customers c WHERE {} ORDER BY c.id LIMIT 1",
        CUSTOMER_COLUMNS, HAS_MOBILE
    ))
    .fetch_optional(pool)
    .await?;

    Ok(customer)
}

/// Submitted invoices with outstanding balance due on or before `due_on_or_before`
pub async fn overdue_invoices(pool: &PgPool, due_on_or_before: NaiveDate) -> Result<Vec<OverdueInvoice>> {
    let invoices = sqlx::query_as::<_, OverdueInvoice>(&format!(
        r#"
        SELECT
            si.name AS invoice_no, si.customer, c.customer_name, btrim(c.mobile_no) AS mobile_no,
            si.due_date, si.outstanding_amount
        FROM sales_invoices si
        JOIN customers c ON c.id = si.customer
        WHERE si.submitted
          AND si.outstanding_amount > 0
          AND si.due_date <= $1
          AND {}
        ORDER BY si.due_date, si.name
        "#,
        HAS_MOBILE
    ))
    .bind(due_on_or_before)
    .fetch_all(pool)
    .await?;

    Ok(invoices)
}

pub async fn birthday_customers(pool: &PgPool, month: u32, day: u32) -> Result<Vec<Customer>> {
    let customers = sqlx::query_as::<_, Customer>(&format!(
        r#"
        SELECT {} FROM customers c
        WHERE EXTRACT(MONTH FROM c.date_of_birth) = $1
          AND EXTRACT(DAY FROM c.date_of_birth) = $2
          AND {}
        ORDER BY c.id
        "#,
        CUSTOMER_COLUMNS, HAS_MOBILE
    ))
    .bind(month as i32)
    .bind(day as i32)
    .fetch_all(pool)
    .await?;

    Ok(customers)
}

/// Customers without a submitted invoice posted on or after `cutoff`
pub async fn inactive_customers(pool: &PgPool, cutoff: NaiveDate) -> Result<Vec<Customer>> {
    let customers = sqlx::query_as::<_, Customer>(&format!(
        r#"
        SELECT {} FROM customers c
        WHERE {}
          AND NOT EXISTS (
              SELECT 1 FROM sales_invoices si
              WHERE si.customer = c.id AND si.submitted AND si.posting_date >= $1
          )
        ORDER BY c.id
        "#,
        CUSTOMER_COLUMNS, HAS_MOBILE
    ))
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(customers)
}

pub async fn recent_item_buyers(pool: &PgPool, item_code: &str, since: NaiveDate) -> Result<Vec<Customer>> {
    let customers = sqlx::query_as::<_, Customer>(&format!(
        r#"
        SELECT {} FROM customers c
        WHERE {}
          AND EXISTS (
              SELECT 1 FROM sales_invoices si
              JOIN sales_invoice_items sii ON sii.invoice = si.name
              WHERE si.customer = c.id
                AND si.submitted
                AND si.posting_date >= $2
                AND sii.item_code = $1
          )
        ORDER BY c.id
        "#,
        CUSTOMER_COLUMNS, HAS_MOBILE
    ))
    .bind(item_code)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(customers)
}
