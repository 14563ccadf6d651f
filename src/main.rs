use anyhow::Result;
use ndarray_rand::rand::{SeedableRng, rngs::StdRng, thread_rng};
use simple_ml::{MnistData, Network, TrainConfig};

fn main() -> Result<()> {
    const NUM_CLASSES: usize = 10;

    pretty_env_logger::init();

    let config = TrainConfig::from_env()?;
    let mnist_data = MnistData::load(&config.data_dir)?;

    let input_dim = mnist_data.training_data.x.ncols();

    let mut network: Network<f32> = match config.seed {
        Some(seed) => Network::new(
            input_dim,
            config.hidden_dim,
            NUM_CLASSES,
            &mut StdRng::seed_from_u64(seed),
        ),
        None => Network::new(input_dim, config.hidden_dim, NUM_CLASSES, &mut thread_rng()),
    };

    let history = network.train(&mnist_data.training_data, &mnist_data.test_data, &config)?;

    println!("| Epoch | Train Loss | Train Err | Test Loss | Test Err |");
    for stats in history {
        println!(
            "|  {:>4} |    {:.5} |   {:.5} |   {:.5} |  {:.5} |",
            stats.epoch, stats.train_loss, stats.train_err, stats.test_loss, stats.test_err
        );
    }

    Ok(())
}
