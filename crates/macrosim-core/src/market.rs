//! Per-period offer pools and the randomized matching engine.
//!
//! A [`Market`] lives for exactly one tick. Supplier sectors publish into it
//! during the publication phase; consumer sectors sample and consume from
//! it through a [`MatchingEngine`] during the consumption phase; supplier
//! sectors read their sales back during settlement. The Circuit drops the
//! market at the end of the tick, so no offer survives into the next
//! period.
//!
//! # Sampling
//!
//! A request first counts the live (non-exhausted) offers of its target.
//! At or below [`MarketConfig::full_scan_threshold`] it lists them in
//! insertion order and shuffles the list. Above it, it probes random
//! indices across the target's pools, skipping exhausted and already-seen
//! offers, and gives up after [`MarketConfig::probe_retry_cap`] failed
//! probes. Exhausted offers keep their slots, so a mostly exhausted pool
//! can end a request short while live offers remain. All randomness comes
//! from the Circuit's stream.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use macrosim_types::{AgentRef, OfferId, Period, SectorId, Supply};

use crate::config::MarketConfig;

/// Errors returned by market operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    /// Malformed request (e.g. a negative quantity).
    #[error("invalid market request: {reason}")]
    InvalidArgument {
        /// What is wrong with the request.
        reason: String,
    },

    /// The offer id does not exist in this period's market.
    #[error("unknown {offer}")]
    UnknownOffer {
        /// The missing offer.
        offer: OfferId,
    },

    /// The sector already published this period.
    #[error("{sector} already published this period")]
    AlreadyPublished {
        /// The publishing sector.
        sector: SectorId,
    },

    /// An offer names a seller outside the publishing sector.
    #[error("{sector} published an offer for foreign seller {seller}")]
    ForeignSeller {
        /// The publishing sector.
        sector: SectorId,
        /// The seller named by the offer.
        seller: AgentRef,
    },

    /// The pool holds more offers than an [`OfferId`] can address.
    #[error("offer pool of {sector} is full")]
    PoolFull {
        /// The publishing sector.
        sector: SectorId,
    },
}

/// Which pools a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// Every pool, in sector registration order.
    Any,
    /// One supplier sector's pool.
    Sector(SectorId),
}

impl Target {
    fn includes(self, sector: SectorId) -> bool {
        match self {
            Self::Any => true,
            Self::Sector(target) => target == sector,
        }
    }
}

/// Read-only snapshot of a live offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// The offer.
    pub offer: OfferId,
    /// The selling agent.
    pub seller: AgentRef,
    /// Unit price.
    pub price: Decimal,
    /// Quantity still available when the quote was taken.
    pub remaining: Decimal,
    /// Whether the good perishes at period end.
    pub perishable: bool,
}

/// One consumption of one offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    /// The consumed offer.
    pub offer: OfferId,
    /// The selling agent.
    pub seller: AgentRef,
    /// The buying agent.
    pub buyer: AgentRef,
    /// Unit price.
    pub price: Decimal,
    /// Quantity taken.
    pub quantity: Decimal,
}

impl Sale {
    /// Price times quantity.
    pub fn value(&self) -> Decimal {
        self.price.saturating_mul(self.quantity)
    }
}

/// Aggregate of published offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupplySummary {
    /// Number of offers.
    pub offers: u64,
    /// Total published quantity.
    pub volume: Decimal,
    /// Total published quantity at offer prices.
    pub value: Decimal,
    /// Total quantity not consumed.
    pub unsold: Decimal,
}

/// Aggregate of the sales journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SalesSummary {
    /// Number of sales.
    pub count: u64,
    /// Total quantity sold.
    pub volume: Decimal,
    /// Total amount paid.
    pub value: Decimal,
}

impl SalesSummary {
    /// Volume-weighted average price, or `None` if nothing traded.
    pub fn average_price(&self) -> Option<Decimal> {
        if self.volume.is_zero() {
            None
        } else {
            self.value.checked_div(self.volume)
        }
    }
}

#[derive(Debug, Clone)]
struct LiveOffer {
    supply: Supply,
    remaining: Decimal,
}

impl LiveOffer {
    fn is_live(&self) -> bool {
        self.remaining > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Default)]
struct OfferPool {
    offers: Vec<LiveOffer>,
    live: usize,
}

/// The offers and sales of one period.
#[derive(Debug)]
pub struct Market {
    period: Period,
    policy: MarketConfig,
    /// One pool per publishing sector; key order is registration order.
    pools: BTreeMap<SectorId, OfferPool>,
    /// Every consumption, in order.
    sales: Vec<Sale>,
}

impl Market {
    /// Open an empty market for `period`.
    pub const fn new(period: Period, policy: MarketConfig) -> Self {
        Self {
            period,
            policy,
            pools: BTreeMap::new(),
            sales: Vec::new(),
        }
    }

    /// The period this market belongs to.
    pub const fn period(&self) -> Period {
        self.period
    }

    /// Add `sector`'s offers for the period. Returns the number of offers
    /// with a positive quantity.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::AlreadyPublished`] on a second publication,
    /// or [`MarketError::ForeignSeller`] if an offer's seller belongs to
    /// another sector. Nothing is published on error.
    pub fn publish(&mut self, sector: SectorId, offers: Vec<Supply>) -> Result<usize, MarketError> {
        if self.pools.contains_key(&sector) {
            return Err(MarketError::AlreadyPublished { sector });
        }
        if let Some(foreign) = offers.iter().find(|s| s.seller().sector != sector) {
            return Err(MarketError::ForeignSeller {
                sector,
                seller: foreign.seller(),
            });
        }
        if u32::try_from(offers.len()).is_err() {
            return Err(MarketError::PoolFull { sector });
        }

        let offers: Vec<LiveOffer> = offers
            .into_iter()
            .map(|supply| LiveOffer {
                remaining: supply.quantity(),
                supply,
            })
            .collect();
        let live = offers.iter().filter(|o| o.is_live()).count();
        debug!(%sector, offers = offers.len(), live, "Offers published");
        self.pools.insert(sector, OfferPool { offers, live });
        Ok(live)
    }

    /// Whether `sector` has published this period.
    pub fn has_published(&self, sector: SectorId) -> bool {
        self.pools.contains_key(&sector)
    }

    /// Number of live offers in `target`.
    pub fn live_count(&self, target: Target) -> usize {
        self.pools
            .iter()
            .filter(|(sector, _)| target.includes(**sector))
            .fold(0_usize, |acc, (_, pool)| acc.saturating_add(pool.live))
    }

    /// Snapshot of one offer, live or exhausted.
    pub fn quote(&self, offer: OfferId) -> Option<Quote> {
        self.offer(offer).map(|live| quote_of(offer, live))
    }

    /// Snapshots of the live offers of `target` in insertion order.
    pub fn offers(&self, target: Target) -> Vec<Quote> {
        self.live_ids(target)
            .into_iter()
            .filter_map(|id| self.quote(id))
            .collect()
    }

    /// Every sale of the period, in order.
    pub fn sales(&self) -> &[Sale] {
        &self.sales
    }

    /// Sales of offers published by `sector`.
    pub fn sales_of(&self, sector: SectorId) -> impl Iterator<Item = &Sale> + '_ {
        self.sales.iter().filter(move |s| s.offer.sector == sector)
    }

    /// Sales made by one seller.
    pub fn sales_by(&self, seller: AgentRef) -> impl Iterator<Item = &Sale> + '_ {
        self.sales.iter().filter(move |s| s.seller == seller)
    }

    /// Aggregate of published offers in `target`.
    pub fn supply_summary(&self, target: Target) -> SupplySummary {
        let mut summary = SupplySummary::default();
        for (_, pool) in self.pools.iter().filter(|(s, _)| target.includes(**s)) {
            for offer in &pool.offers {
                summary.offers = summary.offers.saturating_add(1);
                summary.volume = summary.volume.saturating_add(offer.supply.quantity());
                summary.value = summary.value.saturating_add(offer.supply.value());
                summary.unsold = summary.unsold.saturating_add(offer.remaining);
            }
        }
        summary
    }

    /// Aggregate of the sales journal.
    pub fn sales_summary(&self) -> SalesSummary {
        self.sales
            .iter()
            .fold(SalesSummary::default(), |mut acc, sale| {
                acc.count = acc.count.saturating_add(1);
                acc.volume = acc.volume.saturating_add(sale.quantity);
                acc.value = acc.value.saturating_add(sale.value());
                acc
            })
    }

    fn offer(&self, offer: OfferId) -> Option<&LiveOffer> {
        let index = usize::try_from(offer.index).ok()?;
        self.pools.get(&offer.sector)?.offers.get(index)
    }

    fn is_live(&self, offer: OfferId) -> bool {
        self.offer(offer).is_some_and(LiveOffer::is_live)
    }

    fn live_ids(&self, target: Target) -> Vec<OfferId> {
        let mut ids = Vec::new();
        for (sector, pool) in self.pools.iter().filter(|(s, _)| target.includes(**s)) {
            for (index, offer) in pool.offers.iter().enumerate() {
                if let (true, Ok(index)) = (offer.is_live(), u32::try_from(index)) {
                    ids.push(OfferId {
                        sector: *sector,
                        index,
                    });
                }
            }
        }
        ids
    }

    /// Pool sizes (exhausted offers included) of `target`, in order.
    fn layout(&self, target: Target) -> Vec<(SectorId, usize)> {
        self.pools
            .iter()
            .filter(|(s, _)| target.includes(**s))
            .map(|(sector, pool)| (*sector, pool.offers.len()))
            .collect()
    }

    /// Consume up to `quantity` from `offer` and journal the sale.
    fn take(&mut self, offer: OfferId, buyer: AgentRef, quantity: Decimal) -> Option<Sale> {
        let index = usize::try_from(offer.index).ok()?;
        let pool = self.pools.get_mut(&offer.sector)?;
        let live = pool.offers.get_mut(index)?;
        if !live.is_live() {
            return None;
        }
        let taken = quantity.min(live.remaining);
        if taken <= Decimal::ZERO {
            return None;
        }
        live.remaining = live.remaining.saturating_sub(taken);
        let exhausted = !live.is_live();
        let sale = Sale {
            offer,
            seller: live.supply.seller(),
            buyer,
            price: live.supply.price(),
            quantity: taken,
        };
        if exhausted {
            pool.live = pool.live.saturating_sub(1);
        }
        self.sales.push(sale.clone());
        Some(sale)
    }
}

const fn quote_of(offer: OfferId, live: &LiveOffer) -> Quote {
    Quote {
        offer,
        seller: live.supply.seller(),
        price: live.supply.price(),
        remaining: live.remaining,
        perishable: live.supply.is_perishable(),
    }
}

// ---------------------------------------------------------------------------
// Candidate generation
// ---------------------------------------------------------------------------

/// Source of distinct candidate offers for one request.
enum Candidates {
    /// Shuffled list of every live offer.
    Scan(std::vec::IntoIter<OfferId>),
    /// Random index probes.
    Probe {
        layout: Vec<(SectorId, usize)>,
        slots: usize,
        live_at_start: usize,
        seen: BTreeSet<OfferId>,
        failures: u32,
        cap: u32,
    },
}

impl Candidates {
    fn open(market: &Market, rng: &mut StdRng, target: Target) -> Self {
        let live = market.live_count(target);
        if live <= market.policy.full_scan_threshold {
            let mut ids = market.live_ids(target);
            ids.shuffle(rng);
            return Self::Scan(ids.into_iter());
        }
        let layout = market.layout(target);
        let slots = layout
            .iter()
            .fold(0_usize, |acc, (_, len)| acc.saturating_add(*len));
        Self::Probe {
            layout,
            slots,
            live_at_start: live,
            seen: BTreeSet::new(),
            failures: 0,
            cap: market.policy.probe_retry_cap,
        }
    }

    fn next(&mut self, market: &Market, rng: &mut StdRng) -> Option<OfferId> {
        match self {
            Self::Scan(ids) => ids.find(|id| market.is_live(*id)),
            Self::Probe {
                layout,
                slots,
                live_at_start,
                seen,
                failures,
                cap,
            } => {
                while *failures < *cap && seen.len() < *live_at_start && *slots > 0 {
                    let flat = rng.random_range(0..*slots);
                    let candidate = locate(layout, flat).filter(|id| market.is_live(*id));
                    if let Some(id) = candidate {
                        if seen.insert(id) {
                            return Some(id);
                        }
                    }
                    *failures = failures.saturating_add(1);
                }
                None
            }
        }
    }
}

/// Map a flat index across `layout` to an offer id.
fn locate(layout: &[(SectorId, usize)], flat: usize) -> Option<OfferId> {
    let mut rest = flat;
    for (sector, len) in layout {
        if rest < *len {
            return Some(OfferId {
                sector: *sector,
                index: u32::try_from(rest).ok()?,
            });
        }
        rest = rest.checked_sub(*len)?;
    }
    None
}

// ---------------------------------------------------------------------------
// Matching engine
// ---------------------------------------------------------------------------

/// Sampling and consumption over a period's market.
///
/// Borrowed from the phase context for the duration of a consumer's turn.
pub struct MatchingEngine<'a> {
    market: &'a mut Market,
    rng: &'a mut StdRng,
}

impl<'a> MatchingEngine<'a> {
    /// Wrap `market`, drawing randomness from `rng`.
    pub const fn new(market: &'a mut Market, rng: &'a mut StdRng) -> Self {
        Self { market, rng }
    }

    /// Read access to the market.
    pub fn market(&self) -> &Market {
        &*self.market
    }

    /// Consume up to `quantity` units from a random sample of `target`'s
    /// live offers.
    ///
    /// Each offer appears at most once per request and gives at most its
    /// remaining quantity. The returned sales sum to at most `quantity`.
    /// An exhausted target yields an empty result.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidArgument`] if `quantity` is negative.
    pub fn draw(
        &mut self,
        target: Target,
        buyer: AgentRef,
        quantity: Decimal,
    ) -> Result<Vec<Sale>, MarketError> {
        require_non_negative(quantity)?;
        let mut sales = Vec::new();
        if quantity.is_zero() {
            return Ok(sales);
        }
        let mut need = quantity;
        let mut candidates = Candidates::open(&*self.market, &mut *self.rng, target);
        while need > Decimal::ZERO {
            let Some(offer) = candidates.next(&*self.market, &mut *self.rng) else {
                break;
            };
            if let Some(sale) = self.market.take(offer, buyer, need) {
                need = need.saturating_sub(sale.quantity);
                sales.push(sale);
            }
        }
        Ok(sales)
    }

    /// Up to `count` distinct live offers of `target`, without consuming
    /// them.
    pub fn browse(&mut self, target: Target, count: usize) -> Vec<Quote> {
        let mut quotes = Vec::new();
        if count == 0 {
            return quotes;
        }
        let mut candidates = Candidates::open(&*self.market, &mut *self.rng, target);
        while quotes.len() < count {
            let Some(offer) = candidates.next(&*self.market, &mut *self.rng) else {
                break;
            };
            if let Some(quote) = self.market.quote(offer) {
                quotes.push(quote);
            }
        }
        quotes
    }

    /// Consume up to `quantity` from one chosen offer.
    ///
    /// Returns `None` if the offer is exhausted or `quantity` is zero.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidArgument`] if `quantity` is negative,
    /// or [`MarketError::UnknownOffer`] if the offer does not exist.
    pub fn purchase(
        &mut self,
        offer: OfferId,
        buyer: AgentRef,
        quantity: Decimal,
    ) -> Result<Option<Sale>, MarketError> {
        require_non_negative(quantity)?;
        if self.market.offer(offer).is_none() {
            return Err(MarketError::UnknownOffer { offer });
        }
        Ok(self.market.take(offer, buyer, quantity))
    }
}

fn require_non_negative(quantity: Decimal) -> Result<(), MarketError> {
    if quantity < Decimal::ZERO {
        return Err(MarketError::InvalidArgument {
            reason: format!("requested quantity must be non-negative, got {quantity}"),
        });
    }
    Ok(())
}
