use std::iter::Peekable;
use std::vec::IntoIter;

use anyhow::anyhow;
use chrono::Timelike;
use chrono_tz::Tz;
use tracing::trace;

use crate::datetime::parse_clock_time;
use crate::plan::PlanItem;

#[derive(Debug, Clone)]
pub enum Pred {
  TypeEq(String),
  TypeNe(String),
  HasNotes,
  NoNotes,
  StartsAtOrAfter(u32),
  StartsBefore(u32),
  MinDuration(i64),
  TextContains(String)
}

#[derive(Debug, Clone)]
enum Expr {
  True,
  Pred(Pred),
  And(Vec<Expr>),
  Or(Vec<Expr>)
}

/// Boolean filter over plan items, e.g.
/// `type:call or ( type:meeting
/// after:9:00 )`.
#[derive(Debug, Clone)]
pub struct Filter {
  expr: Expr,
  tz:   Tz
}

impl Filter {
  pub fn all(tz: Tz) -> Self {
    Self {
      expr: Expr::True,
      tz
    }
  }

  #[tracing::instrument(skip(
    terms, tz
  ))]
  pub fn parse(
    terms: &[String],
    tz: Tz
  ) -> anyhow::Result<Self> {
    if terms.is_empty() {
      return Ok(Self::all(tz));
    }

    let tokens = lex_terms(terms)?;
    if tokens.is_empty() {
      return Ok(Self::all(tz));
    }

    let mut parser = Parser {
      tokens: tokens
        .into_iter()
        .peekable()
    };
    let expr = parser.parse_or()?;
    if parser.tokens.next().is_some() {
      return Err(anyhow!(
        "unexpected ')' in filter \
         expression"
      ));
    }

    Ok(Self {
      expr,
      tz
    })
  }

  pub fn matches(
    &self,
    item: &PlanItem
  ) -> bool {
    eval_expr(&self.expr, item, self.tz)
  }
}

/// The plan page's own controls: a type
/// picker (`all` or one type) and a
/// free-text search over title and
/// notes.
#[derive(Debug, Clone, Default)]
pub struct Selection {
  kind:   Option<String>,
  search: Option<String>
}

impl Selection {
  pub fn new(
    kind: Option<&str>,
    search: Option<&str>
  ) -> Self {
    let kind = kind
      .map(str::trim)
      .filter(|k| {
        !k.is_empty()
          && !k.eq_ignore_ascii_case("all")
      })
      .map(str::to_lowercase);
    let search = search
      .map(str::trim)
      .filter(|q| !q.is_empty())
      .map(str::to_lowercase);

    Self {
      kind,
      search
    }
  }

  pub fn matches(
    &self,
    item: &PlanItem
  ) -> bool {
    if let Some(kind) = &self.kind
      && item.kind.to_lowercase() != *kind
    {
      return false;
    }

    match &self.search {
      | Some(query) => {
        text_contains(item, query)
      }
      | None => true
    }
  }
}

/// Applies both filters and orders the
/// survivors by start. Equal starts keep
/// their input order.
#[tracing::instrument(skip_all, fields(count = items.len()))]
pub fn select_items(
  items: Vec<PlanItem>,
  selection: &Selection,
  filter: &Filter
) -> Vec<PlanItem> {
  let mut out: Vec<PlanItem> = items
    .into_iter()
    .filter(|item| {
      selection.matches(item)
        && filter.matches(item)
    })
    .collect();
  out.sort_by_key(|item| item.start);
  trace!(
    selected = out.len(),
    "applied plan filters"
  );
  out
}

enum Token {
  Open,
  Close,
  And,
  Or,
  Atom(Pred)
}

/// Splits words on whitespace and
/// parentheses, then classifies each
/// one. Atoms are parsed here so a bad
/// term fails before the grammar runs.
fn lex_terms(
  terms: &[String]
) -> anyhow::Result<Vec<Token>> {
  let mut words = Vec::new();
  for term in terms {
    let spaced = term
      .replace('(', " ( ")
      .replace(')', " ) ");
    words.extend(
      spaced
        .split_whitespace()
        .map(str::to_string)
    );
  }

  words
    .iter()
    .map(|word| -> anyhow::Result<Token> {
      Ok(match word.to_ascii_lowercase().as_str() {
        | "(" => Token::Open,
        | ")" => Token::Close,
        | "and" | "&&" => Token::And,
        | "or" | "||" => Token::Or,
        | _ => Token::Atom(parse_atom(word)?)
      })
    })
    .collect()
}

/// `or` binds loosest; adjacent terms
/// are an implicit `and`.
struct Parser {
  tokens: Peekable<IntoIter<Token>>
}

impl Parser {
  fn parse_or(
    &mut self
  ) -> anyhow::Result<Expr> {
    let mut nodes =
      vec![self.parse_and()?];
    while self
      .tokens
      .next_if(|t| matches!(t, Token::Or))
      .is_some()
    {
      nodes.push(self.parse_and()?);
    }
    Ok(collapse(nodes, Expr::Or))
  }

  fn parse_and(
    &mut self
  ) -> anyhow::Result<Expr> {
    let mut nodes =
      vec![self.parse_primary()?];
    loop {
      match self.tokens.peek() {
        | Some(Token::And) => {
          self.tokens.next();
        }
        | Some(
          Token::Open | Token::Atom(_)
        ) => {}
        | _ => break
      }
      nodes.push(self.parse_primary()?);
    }
    Ok(collapse(nodes, Expr::And))
  }

  fn parse_primary(
    &mut self
  ) -> anyhow::Result<Expr> {
    match self.tokens.next() {
      | Some(Token::Atom(pred)) => {
        Ok(Expr::Pred(pred))
      }
      | Some(Token::Open) => {
        let inner = self.parse_or()?;
        match self.tokens.next() {
          | Some(Token::Close) => Ok(inner),
          | _ => Err(anyhow!(
            "expected ')' in filter \
             expression"
          ))
        }
      }
      | Some(Token::Close) => Err(anyhow!(
        "unexpected ')' in filter \
         expression"
      )),
      | Some(Token::And | Token::Or) => {
        Err(anyhow!(
          "operator without a term in \
           filter expression"
        ))
      }
      | None => Err(anyhow!(
        "unexpected end of filter \
         expression"
      ))
    }
  }
}

fn collapse(
  mut nodes: Vec<Expr>,
  join: fn(Vec<Expr>) -> Expr
) -> Expr {
  if nodes.len() == 1 {
    nodes.remove(0)
  } else {
    join(nodes)
  }
}

fn parse_atom(
  term: &str
) -> anyhow::Result<Pred> {
  match term {
    | "+notes" => {
      return Ok(Pred::HasNotes);
    }
    | "-notes" => return Ok(Pred::NoNotes),
    | _ => {}
  }

  if let Some(kind) =
    term.strip_prefix("-type:")
  {
    return Ok(Pred::TypeNe(
      kind.to_lowercase()
    ));
  }

  if let Some(kind) =
    term.strip_prefix("type:")
  {
    return Ok(Pred::TypeEq(
      kind.to_lowercase()
    ));
  }

  if let Some(value) =
    term.strip_prefix("after:")
  {
    return Ok(Pred::StartsAtOrAfter(
      parse_clock_minute(value)?
    ));
  }

  if let Some(value) =
    term.strip_prefix("before:")
  {
    return Ok(Pred::StartsBefore(
      parse_clock_minute(value)?
    ));
  }

  if let Some(value) =
    term.strip_prefix("min:")
  {
    let minutes = value
      .trim()
      .parse::<i64>()
      .map_err(|_| {
        anyhow!(
          "min: expects whole minutes, \
           got {value:?}"
        )
      })?;
    return Ok(Pred::MinDuration(
      minutes
    ));
  }

  if term.starts_with('+')
    || (term.starts_with('-')
      && term.len() > 1)
  {
    return Err(anyhow!(
      "unknown filter modifier: {term}"
    ));
  }

  Ok(Pred::TextContains(
    term.to_lowercase()
  ))
}

fn parse_clock_minute(
  value: &str
) -> anyhow::Result<u32> {
  parse_clock_time(value)
    .map(|(hour, minute)| {
      hour * 60 + minute
    })
    .ok_or_else(|| {
      anyhow!(
        "expected a clock time like \
         09:30 or 2:15pm, got {value:?}"
      )
    })
}

fn text_contains(
  item: &PlanItem,
  needle_lower: &str
) -> bool {
  item
    .title
    .to_lowercase()
    .contains(needle_lower)
    || item.notes.as_ref().is_some_and(
      |notes| {
        notes
          .to_lowercase()
          .contains(needle_lower)
      }
    )
}

fn eval_expr(
  expr: &Expr,
  item: &PlanItem,
  tz: Tz
) -> bool {
  match expr {
    | Expr::True => true,
    | Expr::Pred(pred) => {
      eval_pred(pred, item, tz)
    }
    | Expr::And(nodes) => {
      nodes.iter().all(|node| {
        eval_expr(node, item, tz)
      })
    }
    | Expr::Or(nodes) => {
      nodes.iter().any(|node| {
        eval_expr(node, item, tz)
      })
    }
  }
}

fn eval_pred(
  pred: &Pred,
  item: &PlanItem,
  tz: Tz
) -> bool {
  let clock_minute = || {
    let local =
      item.start.with_timezone(&tz);
    local.hour() * 60 + local.minute()
  };

  match pred {
    | Pred::TypeEq(kind) => {
      item.kind.to_lowercase() == *kind
    }
    | Pred::TypeNe(kind) => {
      item.kind.to_lowercase() != *kind
    }
    | Pred::HasNotes => {
      item.notes.is_some()
    }
    | Pred::NoNotes => {
      item.notes.is_none()
    }
    | Pred::StartsAtOrAfter(minute) => {
      clock_minute() >= *minute
    }
    | Pred::StartsBefore(minute) => {
      clock_minute() < *minute
    }
    | Pred::MinDuration(minutes) => {
      item.effective_minutes()
        >= *minutes
    }
    | Pred::TextContains(needle) => {
      text_contains(item, needle)
    }
  }
}
