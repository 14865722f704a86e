use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Token replaced by the pollutant name when a template is bound
pub const DEFAULT_TOKEN: &str = "pollutant";

const START_YEAR: &str = "{start_year}";
const END_YEAR: &str = "{end_year}";

/// Primary-instrument filter every template must carry
const POC_FILTER: &str = "poc = 1";

/// Hourly summary query over the EPA historical air quality dataset.
///
/// Every occurrence of `pollutant` is substituted, so the token picks the
/// source table (`o3_hourly_summary`), the alias and the value column name.
const EPA_HOURLY_TEMPLATE: &str = "SELECT
    pollutant.latitude AS Lat, pollutant.longitude AS Lon, pollutant.sample_measurement AS pollutant, pollutant.date_local AS Date, pollutant.time_local AS Time
FROM
  `bigquery-public-data.epa_historical_air_quality.pollutant_hourly_summary` AS pollutant
WHERE
  pollutant.poc = 1
  AND EXTRACT(YEAR FROM pollutant.date_local) BETWEEN {start_year} AND {end_year}
";

/// Inclusive range of calendar years
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Result<Self> {
        if start > end {
            return Err(Error::Config(format!(
                "year range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn contains(&self, year: i32) -> bool {
        (self.start..=self.end).contains(&year)
    }
}

impl Default for YearRange {
    fn default() -> Self {
        Self {
            start: 2013,
            end: 2017,
        }
    }
}

/// SQL text with one substitutable token
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    text: String,
    token: String,
    years: YearRange,
}

/// A template with the pollutant bound, ready to dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundQuery {
    pub pollutant: String,
    pub sql: String,
}

impl QueryTemplate {
    /// Build a template from arbitrary text.
    ///
    /// The text must mention the token outside the year placeholders and
    /// must carry the `poc = 1` filter and both `{start_year}` and
    /// `{end_year}`.
    pub fn new(text: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let token = token.into();
        if token.is_empty() {
            return Err(Error::Config("query template token cannot be empty".into()));
        }
        for required in [POC_FILTER, START_YEAR, END_YEAR] {
            if !text.contains(required) {
                return Err(Error::Config(format!(
                    "query template must contain '{required}'"
                )));
            }
        }
        if !literal_parts(&text).any(|part| part.contains(&token)) {
            return Err(Error::Config(format!(
                "query template does not contain token '{token}'"
            )));
        }
        Ok(Self {
            text,
            token,
            years: YearRange::default(),
        })
    }

    /// Restrict the template to an inclusive range of years
    pub fn with_years(mut self, start: i32, end: i32) -> Result<Self> {
        self.years = YearRange::new(start, end)?;
        Ok(self)
    }

    #[must_use]
    pub fn years(&self) -> YearRange {
        self.years
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Substitute the pollutant name for every occurrence of the token.
    ///
    /// Names are limited to ASCII letters, digits and underscores so the
    /// result cannot escape the table reference or alias.
    pub fn bind(&self, pollutant: &str) -> Result<BoundQuery> {
        validate_pollutant(pollutant)?;
        // The token is only substituted between placeholders, so a token
        // such as `year` cannot reach into `{start_year}`.
        let start = self.years.start.to_string();
        let end = self.years.end.to_string();
        let sql = self
            .text
            .split(START_YEAR)
            .map(|chunk| {
                chunk
                    .split(END_YEAR)
                    .map(|part| part.replace(&self.token, pollutant))
                    .collect::<Vec<_>>()
                    .join(end.as_str())
            })
            .collect::<Vec<_>>()
            .join(start.as_str());
        Ok(BoundQuery {
            pollutant: pollutant.to_string(),
            sql,
        })
    }
}

impl Default for QueryTemplate {
    fn default() -> Self {
        Self {
            text: EPA_HOURLY_TEMPLATE.to_string(),
            token: DEFAULT_TOKEN.to_string(),
            years: YearRange::default(),
        }
    }
}

/// Template text with the year placeholders cut out
fn literal_parts(text: &str) -> impl Iterator<Item = &str> {
    text.split(START_YEAR).flat_map(|chunk| chunk.split(END_YEAR))
}

/// Check that a pollutant name is usable as a table prefix and column name
pub fn validate_pollutant(pollutant: &str) -> Result<()> {
    if pollutant.is_empty() {
        return Err(Error::Config("pollutant name cannot be empty".into()));
    }
    if !pollutant
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::Config(format!(
            "pollutant name '{pollutant}' may only contain ASCII letters, digits and '_'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_substitutes_every_occurrence() {
        let bound = QueryTemplate::default().bind("o3").unwrap();
        assert_eq!(bound.pollutant, "o3");
        assert!(!bound.sql.contains("pollutant"));
        assert!(bound.sql.contains("epa_historical_air_quality.o3_hourly_summary"));
        assert!(bound.sql.contains("o3.sample_measurement AS o3"));
        assert!(bound.sql.contains("AS o3\nWHERE"));
    }

    #[test]
    fn test_bound_query_keeps_filters() {
        let template = QueryTemplate::default();
        for pollutant in ["o3", "no2"] {
            let bound = template.bind(pollutant).unwrap();
            assert!(bound.sql.contains(&format!("{pollutant}.poc = 1")));
            assert!(bound.sql.contains("BETWEEN 2013 AND 2017"));
            assert!(!bound.sql.contains("{start_year}"));
        }
    }

    #[test]
    fn test_with_years() {
        let template = QueryTemplate::default().with_years(2015, 2016).unwrap();
        let bound = template.bind("no2").unwrap();
        assert!(bound.sql.contains("BETWEEN 2015 AND 2016"));

        assert!(QueryTemplate::default().with_years(2018, 2013).is_err());
    }

    #[test]
    fn test_year_range_is_inclusive() {
        let years = YearRange::default();
        assert!(years.contains(2013));
        assert!(years.contains(2017));
        assert!(!years.contains(2012));
        assert!(!years.contains(2018));
    }

    #[test]
    fn test_bind_rejects_unsafe_names() {
        let template = QueryTemplate::default();
        assert!(template.bind("").is_err());
        assert!(template.bind("o3; DROP TABLE x").is_err());
        assert!(template.bind("no2`").is_err());
        assert!(template.bind("pm25_frm").is_ok());
    }

    const CUSTOM: &str =
        "SELECT {p} FROM t WHERE poc = 1 AND year BETWEEN {start_year} AND {end_year}";

    #[test]
    fn test_custom_template_requires_token() {
        assert!(QueryTemplate::new(CUSTOM, "pollutant").is_err());
        assert!(QueryTemplate::new(CUSTOM, "").is_err());
        // Present only inside a placeholder
        assert!(QueryTemplate::new(CUSTOM.replace("{p}", "x"), "start").is_err());

        let template = QueryTemplate::new(CUSTOM, "{p}").unwrap();
        assert_eq!(
            template.bind("co").unwrap().sql,
            "SELECT co FROM t WHERE poc = 1 AND year BETWEEN 2013 AND 2017"
        );
    }

    #[test]
    fn test_custom_template_requires_filters() {
        for text in [
            "SELECT {p} FROM t",
            "SELECT {p} FROM t WHERE poc = 1",
            "SELECT {p} FROM t WHERE poc = 1 AND y >= {start_year}",
            "SELECT {p} FROM t WHERE y BETWEEN {start_year} AND {end_year}",
        ] {
            let err = QueryTemplate::new(text, "{p}").unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{text}");
        }
    }

    #[test]
    fn test_token_inside_placeholder_keeps_years() {
        let text =
            "SELECT year FROM year_table WHERE poc = 1 AND y BETWEEN {start_year} AND {end_year}";
        let template = QueryTemplate::new(text, "year")
            .unwrap()
            .with_years(2014, 2016)
            .unwrap();
        assert_eq!(
            template.bind("o3").unwrap().sql,
            "SELECT o3 FROM o3_table WHERE poc = 1 AND y BETWEEN 2014 AND 2016"
        );
    }
}
