// src/quote.rs
use crate::models::{Quote, Usd};
use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Source of current stock prices.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// `None` when the symbol is unknown or the service could not answer.
    async fn lookup(&self, symbol: &str) -> Option<Quote>;
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote", default)]
    quote: Option<GlobalQuote>,
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol", default)]
    symbol: Option<String>,
    #[serde(rename = "05. price", default)]
    price: Option<String>,
}

#[derive(Deserialize)]
struct SymbolSearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<SymbolMatch>,
}

#[derive(Deserialize)]
struct SymbolMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "2. name")]
    name: String,
}

pub struct AlphaVantage {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantage {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(AlphaVantage {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn query<T: DeserializeOwned>(
        &self,
        params: &[(&str, &str)],
    ) -> Result<T, reqwest::Error> {
        self.client
            .get(format!("{}/query", self.base_url))
            .query(params)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await
    }

    async fn company_name(&self, symbol: &str) -> Option<String> {
        match self
            .query::<SymbolSearchResponse>(&[("function", "SYMBOL_SEARCH"), ("keywords", symbol)])
            .await
        {
            Ok(search) => search
                .best_matches
                .into_iter()
                .find(|m| m.symbol.eq_ignore_ascii_case(symbol))
                .map(|m| m.name),
            Err(e) => {
                warn!("Symbol search failed for {}: {}", symbol, e);
                None
            }
        }
    }
}

#[async_trait]
impl QuoteProvider for AlphaVantage {
    async fn lookup(&self, symbol: &str) -> Option<Quote> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return None;
        }

        let response = match self
            .query::<GlobalQuoteResponse>(&[("function", "GLOBAL_QUOTE"), ("symbol", symbol.as_str())])
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Quote request for {} failed: {}", symbol, e);
                return None;
            }
        };

        let quote = response.quote?;
        let price = quote
            .price
            .as_deref()
            .and_then(Usd::parse_dollars)
            .filter(|p| *p > Usd::ZERO)?;
        let symbol = quote.symbol.unwrap_or(symbol).to_uppercase();
        let name = self
            .company_name(&symbol)
            .await
            .unwrap_or_else(|| symbol.clone());

        info!("Quoted {} ({}) at {}", symbol, name, price);
        Some(Quote {
            symbol,
            name,
            price,
        })
    }
}

/// A fixed price list, keyed by upper-case symbol.
#[cfg(test)]
pub(crate) struct FixedQuotes(pub std::collections::HashMap<String, Quote>);

#[cfg(test)]
impl FixedQuotes {
    pub(crate) fn new(quotes: &[(&str, &str, i64)]) -> Self {
        FixedQuotes(
            quotes
                .iter()
                .map(|(symbol, name, cents)| {
                    (
                        symbol.to_string(),
                        Quote {
                            symbol: symbol.to_string(),
                            name: name.to_string(),
                            price: Usd(*cents),
                        },
                    )
                })
                .collect(),
        )
    }
}

#[cfg(test)]
#[async_trait]
impl QuoteProvider for FixedQuotes {
    async fn lookup(&self, symbol: &str) -> Option<Quote> {
        self.0.get(&symbol.trim().to_uppercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn query(function: &str) -> Matcher {
        Matcher::UrlEncoded("function".into(), function.into())
    }

    #[tokio::test]
    async fn quote_combines_price_and_name() {
        let mut server = mockito::Server::new_async().await;
        let price = server
            .mock("GET", "/query")
            .match_query(Matcher::AllOf(vec![
                query("GLOBAL_QUOTE"),
                Matcher::UrlEncoded("symbol".into(), "IBM".into()),
                Matcher::UrlEncoded("apikey".into(), "demo".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(r#"{"Global Quote": {"01. symbol": "IBM", "05. price": "189.8400"}}"#)
            .create_async()
            .await;
        let search = server
            .mock("GET", "/query")
            .match_query(query("SYMBOL_SEARCH"))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"bestMatches": [
                    {"1. symbol": "IBMN", "2. name": "iShares"},
                    {"1. symbol": "IBM", "2. name": "International Business Machines Corp"}
                ]}"#,
            )
            .create_async()
            .await;

        let provider = AlphaVantage::new(&server.url(), "demo").unwrap();
        let quote = provider.lookup(" ibm ").await.unwrap();

        assert_eq!(
            quote,
            Quote {
                symbol: "IBM".to_string(),
                name: "International Business Machines Corp".to_string(),
                price: Usd(18_984),
            }
        );
        price.assert_async().await;
        search.assert_async().await;
    }

    #[tokio::test]
    async fn unknown_symbol_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _quote = server
            .mock("GET", "/query")
            .match_query(query("GLOBAL_QUOTE"))
            .with_header("content-type", "application/json")
            .with_body(r#"{"Global Quote": {}}"#)
            .create_async()
            .await;

        let provider = AlphaVantage::new(&server.url(), "demo").unwrap();
        assert_eq!(provider.lookup("NOPE").await, None);
    }

    #[tokio::test]
    async fn name_falls_back_to_symbol() {
        let mut server = mockito::Server::new_async().await;
        let _quote = server
            .mock("GET", "/query")
            .match_query(query("GLOBAL_QUOTE"))
            .with_header("content-type", "application/json")
            .with_body(r#"{"Global Quote": {"01. symbol": "XYZ", "05. price": "1.5"}}"#)
            .create_async()
            .await;
        let _search = server
            .mock("GET", "/query")
            .match_query(query("SYMBOL_SEARCH"))
            .with_status(500)
            .create_async()
            .await;

        let provider = AlphaVantage::new(&server.url(), "demo").unwrap();
        let quote = provider.lookup("xyz").await.unwrap();
        assert_eq!(quote.name, "XYZ");
        assert_eq!(quote.price, Usd(150));
    }

    #[tokio::test]
    async fn server_error_and_bad_price_are_none() {
        let mut server = mockito::Server::new_async().await;
        let _down = server
            .mock("GET", "/query")
            .match_query(Matcher::AllOf(vec![
                query("GLOBAL_QUOTE"),
                Matcher::UrlEncoded("symbol".into(), "DOWN".into()),
            ]))
            .with_status(503)
            .create_async()
            .await;
        let _free = server
            .mock("GET", "/query")
            .match_query(Matcher::AllOf(vec![
                query("GLOBAL_QUOTE"),
                Matcher::UrlEncoded("symbol".into(), "FREE".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(r#"{"Global Quote": {"01. symbol": "FREE", "05. price": "0.0000"}}"#)
            .create_async()
            .await;

        let provider = AlphaVantage::new(&server.url(), "demo").unwrap();
        assert_eq!(provider.lookup("DOWN").await, None);
        assert_eq!(provider.lookup("FREE").await, None);
    }

    #[tokio::test]
    async fn blank_symbol_skips_the_request() {
        let mut server = mockito::Server::new_async().await;
        let never = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let provider = AlphaVantage::new(&server.url(), "demo").unwrap();
        assert_eq!(provider.lookup("   ").await, None);
        never.assert_async().await;
    }
}
