//! Text command parsing for bulk queue loads.
//!
//! Parameters are whitespace separated. A queue load reads
//!
//! ```text
//! [ordering] (target [start end] [hard] [plan=N])*
//! ```
//!
//! where the leading ordering code is only present for first-possible
//! placement and the times only when the load carries them. `nan` or `-`
//! leaves a time unset. A qid update reads `(qid target start end)*`.

use std::str::SplitWhitespace;

use skyq_core::{FirstOrdering, TargetId};

use crate::error::{QueueError, QueueResult};

/// Cursor over whitespace separated command parameters.
pub struct ParamReader<'a> {
    tokens: std::iter::Peekable<SplitWhitespace<'a>>,
}

impl<'a> ParamReader<'a> {
    pub fn new(params: &'a str) -> Self {
        Self {
            tokens: params.split_whitespace().peekable(),
        }
    }

    pub fn at_end(&mut self) -> bool {
        self.tokens.peek().is_none()
    }

    fn next_token(&mut self, what: &str) -> QueueResult<&'a str> {
        self.tokens
            .next()
            .ok_or_else(|| QueueError::Parse(format!("missing {what}")))
    }

    pub fn next_integer(&mut self) -> QueueResult<i64> {
        let token = self.next_token("integer")?;
        token
            .parse()
            .map_err(|_| QueueError::Parse(format!("expected integer, got {token:?}")))
    }

    /// Read a time in unix seconds; `nan`, `-` and non-finite values are unset.
    pub fn next_time(&mut self) -> QueueResult<Option<f64>> {
        let token = self.next_token("time")?;
        if token == "-" {
            return Ok(None);
        }
        let value: f64 = token
            .parse()
            .map_err(|_| QueueError::Parse(format!("expected time, got {token:?}")))?;
        Ok(value.is_finite().then_some(value))
    }

    /// Consume the next token if `f` accepts it.
    fn next_if<T>(&mut self, f: impl Fn(&str) -> Option<T>) -> Option<T> {
        let value = self.tokens.peek().and_then(|t| f(t))?;
        self.tokens.next();
        Some(value)
    }
}

/// One target of a queue load.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRequest {
    pub target: TargetId,
    pub t_start: Option<f64>,
    pub t_end: Option<f64>,
    pub plan_id: Option<i32>,
    pub hard: bool,
}

/// A parsed queue load. Entries that failed to parse are kept as errors so
/// the caller can count them.
#[derive(Debug)]
pub struct QueueLoad {
    pub ordering: FirstOrdering,
    pub requests: Vec<QueueResult<QueueRequest>>,
}

fn target_id(value: i64) -> QueueResult<TargetId> {
    TargetId::try_from(value).map_err(|_| QueueError::Parse(format!("target id {value} out of range")))
}

pub fn parse_queue_load(params: &str, with_times: bool, with_ordering: bool) -> QueueLoad {
    let mut reader = ParamReader::new(params);
    let ordering = if with_ordering {
        reader
            .next_if(|t| t.parse::<i32>().ok())
            .map(FirstOrdering::from_code)
            .unwrap_or_default()
    } else {
        FirstOrdering::None
    };

    let mut requests = Vec::new();
    while !reader.at_end() {
        requests.push(parse_request(&mut reader, with_times));
    }
    QueueLoad { ordering, requests }
}

fn parse_request(reader: &mut ParamReader<'_>, with_times: bool) -> QueueResult<QueueRequest> {
    let target = target_id(reader.next_integer()?)?;
    let (t_start, t_end) = if with_times {
        (reader.next_time()?, reader.next_time()?)
    } else {
        (None, None)
    };
    let mut request = QueueRequest {
        target,
        t_start,
        t_end,
        plan_id: None,
        hard: false,
    };
    loop {
        if reader.next_if(|t| (t == "hard").then_some(())).is_some() {
            request.hard = true;
        } else if let Some(plan) = reader.next_if(|t| t.strip_prefix("plan=").map(str::to_owned)) {
            let plan = plan
                .parse()
                .map_err(|_| QueueError::Parse(format!("bad plan id {plan:?}")))?;
            request.plan_id = Some(plan);
        } else {
            return Ok(request);
        }
    }
}

/// One tuple of a qid update.
#[derive(Debug, Clone, PartialEq)]
pub struct QidUpdate {
    /// 0 inserts, negative removes `|qid|`, positive updates in place.
    pub qid: i64,
    pub target: TargetId,
    pub t_start: Option<f64>,
    pub t_end: Option<f64>,
}

/// Parse a qid update. Stops at the first malformed tuple.
pub fn parse_qid_updates(params: &str) -> QueueResult<Vec<QidUpdate>> {
    let mut reader = ParamReader::new(params);
    let mut updates = Vec::new();
    while !reader.at_end() {
        let qid = reader.next_integer()?;
        let target = target_id(reader.next_integer()?)?;
        let t_start = reader.next_time()?;
        let t_end = reader.next_time()?;
        updates.push(QidUpdate {
            qid,
            target,
            t_start,
            t_end,
        });
    }
    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_target_list() {
        let load = parse_queue_load("1 2  3", false, false);
        assert_eq!(load.ordering, FirstOrdering::None);
        let ids: Vec<TargetId> = load.requests.iter().map(|r| r.as_ref().unwrap().target).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn times_and_attributes() {
        let load = parse_queue_load("5 100 200 hard plan=7 6 nan - 8 - 300", true, false);
        let reqs: Vec<QueueRequest> = load.requests.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            reqs[0],
            QueueRequest {
                target: 5,
                t_start: Some(100.0),
                t_end: Some(200.0),
                plan_id: Some(7),
                hard: true,
            }
        );
        assert_eq!(reqs[1].t_start, None);
        assert_eq!(reqs[1].t_end, None);
        assert!(!reqs[1].hard);
        assert_eq!(reqs[2].t_end, Some(300.0));
    }

    #[test]
    fn ordering_code_leads_first_possible_load() {
        let load = parse_queue_load("2 10 11", false, true);
        assert_eq!(load.ordering, FirstOrdering::SetFirst);
        assert_eq!(load.requests.len(), 2);
    }

    #[test]
    fn malformed_entries_are_reported_not_fatal() {
        let load = parse_queue_load("1 bogus 3", false, false);
        assert_eq!(load.requests.len(), 3);
        assert!(load.requests[0].is_ok());
        assert!(matches!(load.requests[1], Err(QueueError::Parse(_))));
        assert!(load.requests[2].is_ok());
    }

    #[test]
    fn truncated_times_fail() {
        let load = parse_queue_load("4 100", true, false);
        assert_eq!(load.requests.len(), 1);
        assert!(load.requests[0].is_err());
    }

    #[test]
    fn qid_updates_parse() {
        let updates = parse_qid_updates("0 4 nan nan -12 4 - - 9 5 10 20").unwrap();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[1].qid, -12);
        assert_eq!(updates[2].t_start, Some(10.0));
        assert!(parse_qid_updates("0 4 nan").is_err());
    }
}
