//! Simulated network with bounded random delivery delay and optional
//! payload fragmentation.

use rand::Rng;
use std::time::Duration;

/// Configuration for the simulated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Delivery delay is drawn uniformly from `[0, max_delivery_delay_ms)`
    /// whole milliseconds. Zero delivers instantly.
    pub max_delivery_delay_ms: u64,
    /// Split every payload into randomly sized chunks delivered back to back.
    pub fragment_payloads: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_delivery_delay_ms: 5,
            fragment_payloads: false,
        }
    }
}

#[derive(Debug)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Sample a delivery delay for one message.
    pub fn sample_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.config.max_delivery_delay_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.random_range(0..self.config.max_delivery_delay_ms))
    }

    /// Cut `payload` into the chunks the receiver will observe, in order.
    pub fn fragment<R: Rng + ?Sized>(&self, payload: Vec<u8>, rng: &mut R) -> Vec<Vec<u8>> {
        if !self.config.fragment_payloads || payload.len() < 2 {
            return vec![payload];
        }

        let mut chunks = Vec::new();
        let mut rest = payload.as_slice();
        while !rest.is_empty() {
            let size = rng.random_range(1..=rest.len());
            let (chunk, tail) = rest.split_at(size);
            chunks.push(chunk.to_vec());
            rest = tail;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn delay_is_bounded() {
        let network = SimulatedNetwork::new(NetworkConfig::default());
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..500 {
            assert!(network.sample_delay(&mut rng) < Duration::from_millis(5));
        }
    }

    #[test]
    fn zero_delay_network_is_instant() {
        let network = SimulatedNetwork::new(NetworkConfig {
            max_delivery_delay_ms: 0,
            fragment_payloads: false,
        });
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(network.sample_delay(&mut rng), Duration::ZERO);
    }

    #[test]
    fn fragments_concatenate_back_to_payload() {
        let network = SimulatedNetwork::new(NetworkConfig {
            max_delivery_delay_ms: 5,
            fragment_payloads: true,
        });
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let chunks = network.fragment(b"310".to_vec(), &mut rng);
            assert!(chunks.iter().all(|c| !c.is_empty()));
            assert_eq!(chunks.concat(), b"310");
        }
    }

    #[test]
    fn fragmentation_off_keeps_payload_whole() {
        let network = SimulatedNetwork::new(NetworkConfig::default());
        let mut rng = StdRng::seed_from_u64(11);
        assert_eq!(network.fragment(b"217".to_vec(), &mut rng), vec![b"217".to_vec()]);
    }
}
