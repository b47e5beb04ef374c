//! Quarterly fundamentals decoder.
//!
//! `GET /v10/finance/quoteSummary/{symbol}` with the three quarterly
//! statement modules. The endpoint frequently answers 401 under
//! unauthenticated access; that surfaces as the terminal refused error
//! before this decoder ever runs. Absent modules and unknown fields are
//! tolerated; statements without a period end are rejected.

use serde::Deserialize;

use crate::errors::FeedError;

const MODULES: &str =
    "incomeStatementHistoryQuarterly,balanceSheetHistoryQuarterly,cashflowStatementHistoryQuarterly";

pub fn fundamentals_url(base_url: &str, symbol: &str) -> String {
    format!(
        "{}/v10/finance/quoteSummary/{}?modules={}",
        base_url.trim_end_matches('/'),
        symbol,
        MODULES,
    )
}

/// `{raw, fmt}` wrapper the upstream uses for every numeric field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawValue {
    pub raw: Option<f64>,
    pub fmt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDate {
    pub raw: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSummaryEnvelope {
    pub quote_summary: QuoteSummaryNode,
}

#[derive(Debug, Deserialize)]
pub struct QuoteSummaryNode {
    pub result: Option<Vec<QuoteSummaryResult>>,
    pub error: Option<crate::yahoo::chart::UpstreamError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSummaryResult {
    pub income_statement_history_quarterly: Option<IncomeHistory>,
    pub balance_sheet_history_quarterly: Option<BalanceHistory>,
    pub cashflow_statement_history_quarterly: Option<CashflowHistory>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeHistory {
    #[serde(default)]
    pub income_statement_history: Vec<IncomeStatement>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceHistory {
    #[serde(default)]
    pub balance_sheet_statements: Vec<BalanceSheet>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashflowHistory {
    #[serde(default)]
    pub cashflow_statements: Vec<CashflowStatement>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeStatement {
    pub end_date: RawDate,
    pub total_revenue: Option<RawValue>,
    pub cost_of_revenue: Option<RawValue>,
    pub gross_profit: Option<RawValue>,
    pub operating_income: Option<RawValue>,
    pub ebit: Option<RawValue>,
    pub net_income: Option<RawValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSheet {
    pub end_date: RawDate,
    pub total_assets: Option<RawValue>,
    pub total_liab: Option<RawValue>,
    pub total_stockholder_equity: Option<RawValue>,
    pub cash: Option<RawValue>,
    pub long_term_debt: Option<RawValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashflowStatement {
    pub end_date: RawDate,
    pub total_cash_from_operating_activities: Option<RawValue>,
    pub capital_expenditures: Option<RawValue>,
    pub dividends_paid: Option<RawValue>,
}

/// One statement flattened into `(key, value)` pairs ready for the
/// normalizer. Keys are `module.field` in snake_case.
#[derive(Debug, Clone)]
pub struct RawStatement {
    pub period_end_epoch: i64,
    pub fields: Vec<(String, f64)>,
}

fn push_field(fields: &mut Vec<(String, f64)>, key: &str, value: &Option<RawValue>) -> Result<(), FeedError> {
    if let Some(raw) = value.as_ref().and_then(|v| v.raw) {
        if !raw.is_finite() {
            return Err(FeedError::Malformed {
                endpoint: "/v10/finance/quoteSummary".to_string(),
                message: format!("non-finite value for {key}"),
            });
        }
        fields.push((key.to_string(), raw));
    }
    Ok(())
}

fn period_end(date: &RawDate, module: &str) -> Result<i64, FeedError> {
    match date.raw {
        Some(epoch) if epoch > 0 => Ok(epoch),
        _ => Err(FeedError::Malformed {
            endpoint: "/v10/finance/quoteSummary".to_string(),
            message: format!("{module} statement missing period end"),
        }),
    }
}

/// Unwrap and flatten the three quarterly modules. At least one statement
/// must be present.
pub fn decode_fundamentals(
    envelope: QuoteSummaryEnvelope,
    endpoint: &str,
) -> Result<Vec<RawStatement>, FeedError> {
    if let Some(err) = envelope.quote_summary.error {
        return Err(FeedError::Malformed {
            endpoint: endpoint.to_string(),
            message: format!("upstream error: {}", err.message()),
        });
    }
    let mut results = envelope
        .quote_summary
        .result
        .ok_or_else(|| FeedError::Malformed {
            endpoint: endpoint.to_string(),
            message: "missing quoteSummary result".to_string(),
        })?;
    if results.is_empty() {
        return Err(FeedError::Malformed {
            endpoint: endpoint.to_string(),
            message: "empty quoteSummary result".to_string(),
        });
    }
    let result = results.remove(0);

    let mut statements = Vec::new();

    if let Some(history) = result.income_statement_history_quarterly {
        for stmt in history.income_statement_history {
            let mut fields = Vec::new();
            push_field(&mut fields, "income.total_revenue", &stmt.total_revenue)?;
            push_field(&mut fields, "income.cost_of_revenue", &stmt.cost_of_revenue)?;
            push_field(&mut fields, "income.gross_profit", &stmt.gross_profit)?;
            push_field(&mut fields, "income.operating_income", &stmt.operating_income)?;
            push_field(&mut fields, "income.ebit", &stmt.ebit)?;
            push_field(&mut fields, "income.net_income", &stmt.net_income)?;
            statements.push(RawStatement {
                period_end_epoch: period_end(&stmt.end_date, "income")?,
                fields,
            });
        }
    }
    if let Some(history) = result.balance_sheet_history_quarterly {
        for stmt in history.balance_sheet_statements {
            let mut fields = Vec::new();
            push_field(&mut fields, "balance.total_assets", &stmt.total_assets)?;
            push_field(&mut fields, "balance.total_liabilities", &stmt.total_liab)?;
            push_field(
                &mut fields,
                "balance.total_stockholder_equity",
                &stmt.total_stockholder_equity,
            )?;
            push_field(&mut fields, "balance.cash", &stmt.cash)?;
            push_field(&mut fields, "balance.long_term_debt", &stmt.long_term_debt)?;
            statements.push(RawStatement {
                period_end_epoch: period_end(&stmt.end_date, "balance")?,
                fields,
            });
        }
    }
    if let Some(history) = result.cashflow_statement_history_quarterly {
        for stmt in history.cashflow_statements {
            let mut fields = Vec::new();
            push_field(
                &mut fields,
                "cashflow.operating_cashflow",
                &stmt.total_cash_from_operating_activities,
            )?;
            push_field(
                &mut fields,
                "cashflow.capital_expenditures",
                &stmt.capital_expenditures,
            )?;
            push_field(&mut fields, "cashflow.dividends_paid", &stmt.dividends_paid)?;
            statements.push(RawStatement {
                period_end_epoch: period_end(&stmt.end_date, "cashflow")?,
                fields,
            });
        }
    }

    if statements.is_empty() {
        return Err(FeedError::Malformed {
            endpoint: endpoint.to_string(),
            message: "no quarterly statements in response".to_string(),
        });
    }
    Ok(statements)
}

#[cfg(test)]
pub(crate) const FUNDAMENTALS_FIXTURE: &str = r#"{
  "quoteSummary": {
    "result": [{
      "incomeStatementHistoryQuarterly": {
        "incomeStatementHistory": [{
          "endDate": { "raw": 1703980800, "fmt": "2023-12-31" },
          "totalRevenue": { "raw": 119575000000.0, "fmt": "119.58B" },
          "netIncome": { "raw": 33916000000.0, "fmt": "33.92B" },
          "unknownNewField": { "raw": 1.0 }
        }]
      },
      "balanceSheetHistoryQuarterly": {
        "balanceSheetStatements": [{
          "endDate": { "raw": 1703980800 },
          "totalAssets": { "raw": 353514000000.0 }
        }]
      }
    }],
    "error": null
  }
}"#;
