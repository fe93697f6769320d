//! Activity trait - 型付き activity の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const NAME`)
//! - Associated Types (`type Output`)

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{ActivityCall, ValidationError};

/// Activity binds an argument payload type to a registered name and an output type.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct FetchQuote {
///     symbol: String,
/// }
///
/// impl Activity for FetchQuote {
///     const NAME: &'static str = "ticker.fetch_quote.v1";
///     type Output = Quote;
/// }
/// ```
///
/// # 命名規約
/// - `{domain}.{action}.v{major}`
pub trait Activity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    type Output: Serialize + Send + 'static;

    /// Build the untyped call the orchestrator stores on a task.
    fn to_call(&self) -> Result<ActivityCall, ValidationError> {
        let args =
            serde_json::to_value(self).map_err(|e| ValidationError::Arguments(e.to_string()))?;
        Ok(ActivityCall::new(Self::NAME, args))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::FetchQuote;
    use super::*;

    #[test]
    fn to_call_uses_registered_name() {
        let call = FetchQuote {
            symbol: "AAPL".into(),
        }
        .to_call()
        .unwrap();
        assert_eq!(call.activity.as_str(), FetchQuote::NAME);
        assert_eq!(call.args, serde_json::json!({"symbol": "AAPL"}));
        assert!(call.timeout.is_none());
    }
}
