//! Pure reducers over a ticket sequence. Groups come out in first-seen order.

use crate::normalize::UNCATEGORIZED_LABEL;
use crate::types::Ticket;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerchantTotal {
    pub merchant: String,
    pub total: f64,
    pub count: usize,
}

/// Grouping key for categories. `Uncategorized` never collides with a label,
/// including the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum CategoryKey {
    Labeled(String),
    Uncategorized,
}

impl CategoryKey {
    pub fn of(ticket: &Ticket) -> Self {
        match &ticket.data.category {
            Some(c) => CategoryKey::Labeled(c.clone()),
            None => CategoryKey::Uncategorized,
        }
    }

    /// Filter to apply when this group is selected: its label, or show-all
    /// for the uncategorized group.
    pub fn as_filter(&self) -> Option<String> {
        match self {
            CategoryKey::Labeled(c) => Some(c.clone()),
            CategoryKey::Uncategorized => None,
        }
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryKey::Labeled(c) => f.write_str(c),
            CategoryKey::Uncategorized => f.write_str(UNCATEGORIZED_LABEL),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    #[serde(rename = "category")]
    pub key: CategoryKey,
    pub total: f64,
    pub count: usize,
}

/// Everything the summary view shows for a ticket sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub count: usize,
    pub total_amount: f64,
    pub average_amount: f64,
    pub by_merchant: Vec<MerchantTotal>,
    pub by_category: Vec<CategoryTotal>,
}

pub fn by_merchant<'a, I>(tickets: I) -> Vec<MerchantTotal>
where
    I: IntoIterator<Item = &'a Ticket>,
{
    group_first_seen(tickets, |t| t.data.merchant.clone())
        .into_iter()
        .map(|(merchant, total, count)| MerchantTotal {
            merchant,
            total,
            count,
        })
        .collect()
}

pub fn by_category<'a, I>(tickets: I) -> Vec<CategoryTotal>
where
    I: IntoIterator<Item = &'a Ticket>,
{
    group_first_seen(tickets, CategoryKey::of)
        .into_iter()
        .map(|(key, total, count)| CategoryTotal { key, total, count })
        .collect()
}

pub fn total_amount<'a, I>(tickets: I) -> f64
where
    I: IntoIterator<Item = &'a Ticket>,
{
    tickets.into_iter().map(|t| t.data.amount).sum()
}

/// Mean amount, 0 for an empty sequence.
pub fn average_amount<'a, I>(tickets: I) -> f64
where
    I: IntoIterator<Item = &'a Ticket>,
{
    let (sum, count) = tickets
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), t| (sum + t.data.amount, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub fn summarize<'a, I>(tickets: I) -> Summary
where
    I: IntoIterator<Item = &'a Ticket>,
{
    let tickets: Vec<&Ticket> = tickets.into_iter().collect();
    Summary {
        count: tickets.len(),
        total_amount: total_amount(tickets.iter().copied()),
        average_amount: average_amount(tickets.iter().copied()),
        by_merchant: by_merchant(tickets.iter().copied()),
        by_category: by_category(tickets.iter().copied()),
    }
}

/// (key, total, count) per distinct key, in order of first appearance.
fn group_first_seen<'a, I, K, F>(tickets: I, key_of: F) -> Vec<(K, f64, usize)>
where
    I: IntoIterator<Item = &'a Ticket>,
    K: Hash + Eq + Clone,
    F: Fn(&Ticket) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, f64, usize)> = Vec::new();
    for ticket in tickets {
        let key = key_of(ticket);
        match index.get(&key) {
            Some(&pos) => {
                let group = &mut groups[pos];
                group.1 += ticket.data.amount;
                group.2 += 1;
            }
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, ticket.data.amount, 1));
            }
        }
    }
    groups
}
