//! Accelerator card enumeration and the pool of free cards.

use std::collections::BTreeSet;
use std::process::Command;
use tracing::{debug, info};

use crate::error::{Result, SubtitleError};

/// A single accelerator card as reported at startup
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsCard {
    pub id: u32,
    pub name: String,
    pub memory_gb: f64,
}

/// Source of the raw card list, `(name, memory_total_mib)` per card
#[cfg_attr(test, mockall::automock)]
pub trait GpuProbe {
    fn query_cards(&self) -> Result<Vec<(String, u64)>>;
}

/// Enumerates cards by shelling out to `nvidia-smi`
pub struct NvidiaSmiProbe {
    binary_path: String,
}

impl NvidiaSmiProbe {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

impl GpuProbe for NvidiaSmiProbe {
    fn query_cards(&self) -> Result<Vec<(String, u64)>> {
        debug!("Querying video cards with {}", self.binary_path);

        let output = Command::new(&self.binary_path)
            .arg("--query-gpu=name,memory.total")
            .arg("--format=csv,noheader")
            .output()
            .map_err(|e| SubtitleError::GpuProbe(format!("{} is not available: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SubtitleError::GpuProbe(format!("{} failed: {}", self.binary_path, stderr.trim())));
        }

        parse_nvidia_smi_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `name, 8192 MiB` lines as printed by `nvidia-smi --format=csv,noheader`
pub fn parse_nvidia_smi_output(text: &str) -> Result<Vec<(String, u64)>> {
    let mut cards = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (name, memory) = line
            .rsplit_once(',')
            .ok_or_else(|| SubtitleError::GpuProbe(format!("Unexpected nvidia-smi line: {}", line)))?;

        let mib = memory
            .split_whitespace()
            .next()
            .and_then(|m| m.parse::<u64>().ok())
            .ok_or_else(|| SubtitleError::GpuProbe(format!("Unreadable memory size: {}", memory.trim())))?;

        cards.push((name.trim().to_string(), mib));
    }
    Ok(cards)
}

/// Fixed set of cards plus the subset currently free.
///
/// Only the scheduler mutates the free set; every mutation goes through
/// `&mut self`.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    cards: Vec<GraphicsCard>,
    free: BTreeSet<u32>,
}

impl ResourcePool {
    pub fn new(cards: Vec<GraphicsCard>) -> Result<Self> {
        if cards.is_empty() {
            return Err(SubtitleError::NoCardsFound);
        }
        let free = cards.iter().map(|c| c.id).collect();
        Ok(Self { cards, free })
    }

    /// Build the pool from a single probe query
    pub fn from_probe(probe: &dyn GpuProbe) -> Result<Self> {
        let cards: Vec<GraphicsCard> = probe
            .query_cards()?
            .into_iter()
            .enumerate()
            .map(|(idx, (name, mib))| GraphicsCard {
                id: idx as u32,
                name,
                memory_gb: mib as f64 / 1024.0,
            })
            .collect();

        for card in &cards {
            info!("Found card [{}]: {}, {:.1} GB", card.id, card.name, card.memory_gb);
        }
        Self::new(cards)
    }

    pub fn cards(&self) -> &[GraphicsCard] {
        &self.cards
    }

    pub fn card(&self, id: u32) -> Option<&GraphicsCard> {
        self.cards.iter().find(|c| c.id == id)
    }

    pub fn is_free(&self, id: u32) -> bool {
        self.free.contains(&id)
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Largest capacity across the whole pool, busy or not
    pub fn max_capacity_gb(&self) -> f64 {
        self.cards.iter().map(|c| c.memory_gb).fold(0.0, f64::max)
    }

    /// Largest capacity among currently free cards
    pub fn max_free_capacity_gb(&self) -> f64 {
        self.cards
            .iter()
            .filter(|c| self.free.contains(&c.id))
            .map(|c| c.memory_gb)
            .fold(0.0, f64::max)
    }

    /// First free card in enumeration order that has enough memory
    pub fn find_feasible(&self, required_gb: f64) -> Option<&GraphicsCard> {
        self.cards
            .iter()
            .find(|c| self.free.contains(&c.id) && c.memory_gb >= required_gb)
    }

    pub fn acquire(&mut self, id: u32) -> Result<()> {
        if !self.free.remove(&id) {
            return Err(SubtitleError::CardBusy(id));
        }
        debug!("Acquired card {}", id);
        Ok(())
    }

    pub fn release(&mut self, id: u32) {
        if self.card(id).is_some() && self.free.insert(id) {
            debug!("Released card {}", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: u32, memory_gb: f64) -> GraphicsCard {
        GraphicsCard {
            id,
            name: format!("card{}", id),
            memory_gb,
        }
    }

    #[test]
    fn test_parse_nvidia_smi_output() {
        let text = "NVIDIA GeForce RTX 3080, 10240 MiB\n\nTesla T4, 15360 MiB\n";
        let cards = parse_nvidia_smi_output(text).unwrap();
        assert_eq!(
            cards,
            vec![
                ("NVIDIA GeForce RTX 3080".to_string(), 10240),
                ("Tesla T4".to_string(), 15360)
            ]
        );
        assert!(parse_nvidia_smi_output("garbage").is_err());
    }

    #[test]
    fn test_from_probe_converts_mib() {
        let mut probe = MockGpuProbe::new();
        probe
            .expect_query_cards()
            .times(1)
            .returning(|| Ok(vec![("A".to_string(), 8192), ("B".to_string(), 4096)]));

        let pool = ResourcePool::from_probe(&probe).unwrap();
        assert_eq!(pool.cards().len(), 2);
        assert_eq!(pool.cards()[0].memory_gb, 8.0);
        assert_eq!(pool.cards()[1].id, 1);
        assert_eq!(pool.max_capacity_gb(), 8.0);
    }

    #[test]
    fn test_empty_probe_is_fatal() {
        let mut probe = MockGpuProbe::new();
        probe.expect_query_cards().returning(|| Ok(vec![]));
        assert!(matches!(
            ResourcePool::from_probe(&probe),
            Err(SubtitleError::NoCardsFound)
        ));
    }

    #[test]
    fn test_first_fit_not_best_fit() {
        let mut pool = ResourcePool::new(vec![card(0, 8.0), card(1, 4.0)]).unwrap();
        // A 3 GB job would fit best on card 1, first-fit still picks card 0.
        assert_eq!(pool.find_feasible(3.0).unwrap().id, 0);

        pool.acquire(0).unwrap();
        assert_eq!(pool.find_feasible(3.0).unwrap().id, 1);
        assert!(pool.find_feasible(5.0).is_none());
    }

    #[test]
    fn test_acquire_is_exclusive() {
        let mut pool = ResourcePool::new(vec![card(0, 8.0)]).unwrap();
        pool.acquire(0).unwrap();
        assert!(matches!(pool.acquire(0), Err(SubtitleError::CardBusy(0))));
        assert_eq!(pool.max_free_capacity_gb(), 0.0);

        pool.release(0);
        assert!(pool.is_free(0));
        assert_eq!(pool.free_count(), 1);
    }
}
