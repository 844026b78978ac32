// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use clap::error::ErrorKind;
use clap::CommandFactory;
use clap::Parser;
use log::info;
use statrs::statistics::Data;
use statrs::statistics::Distribution;
use statrs::statistics::Max;
use statrs::statistics::Min;
use statrs::statistics::OrderStatistics;

use mpcc::Config;
use mpcc::CongestionControlAlgorithm;
use mpcc_tools::PathModel;
use mpcc_tools::Result;
use mpcc_tools::Simulator;

#[derive(Parser, Debug, Clone)]
#[clap(name = "mpcc_sim")]
pub struct SimOpt {
    /// Round trip time of each path in milliseconds, e.g. 20,80
    #[clap(long, value_delimiter = ',', default_values_t = [20, 80], value_name = "TIME")]
    pub rtt: Vec<u64>,

    /// Segment loss probability of each path. A single value applies to all
    /// paths.
    #[clap(long, value_delimiter = ',', default_values_t = [0.001], value_name = "PROB")]
    pub loss: Vec<f64>,

    /// Number of rounds to simulate.
    #[clap(short, long, default_value = "1000", value_name = "NUM")]
    pub rounds: usize,

    /// Congestion control algorithm.
    #[clap(long, default_value = "CMTRPV2")]
    pub congestion_control_algor: CongestionControlAlgorithm,

    /// Run the session in single path mode.
    #[clap(long)]
    pub disable_multipath: bool,

    /// Session configuration in JSON. Command line options take precedence.
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<String>,

    /// Seed of the loss generator.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub seed: u64,

    /// Print the congestion window of every round.
    #[clap(short, long)]
    pub verbose: bool,

    /// Log level, support OFF/ERROR/WARN/INFO/DEBUG/TRACE.
    #[clap(long, default_value = "INFO", value_name = "STR")]
    pub log_level: log::LevelFilter,

    /// Log file path. If no file is specified, logs will be written to `stderr`.
    #[clap(long, value_name = "FILE")]
    pub log_file: Option<String>,
}

fn parse_option() -> std::result::Result<SimOpt, clap::error::Error> {
    let mut option = SimOpt::parse();

    if option.rtt.is_empty() {
        return Err(SimOpt::command().error(
            ErrorKind::MissingRequiredArgument,
            "Specify at least one path RTT",
        ));
    }

    if option.loss.len() == 1 {
        option.loss = vec![option.loss[0]; option.rtt.len()];
    }
    if option.loss.len() != option.rtt.len() {
        return Err(SimOpt::command().error(
            ErrorKind::WrongNumberOfValues,
            "Specify one loss probability, or one per path",
        ));
    }

    Ok(option)
}

fn build_config(option: &SimOpt) -> Result<Config> {
    let mut conf = match &option.config {
        Some(path) => mpcc_tools::load_config(path)?,
        None => Config::new(),
    };
    conf.set_congestion_control_algorithm(option.congestion_control_algor);
    conf.set_max_subflows(option.rtt.len());
    Ok(conf)
}

fn print_summary(sim: &Simulator) -> Result<()> {
    let session = sim.session();
    println!(
        "algorithm: {}, multipath: {}",
        session.congestion_control_name(),
        session.is_multipath()
    );

    for (sid, model, samples) in sim.paths() {
        let subflow = session.get(sid)?;
        let cwnds: Vec<f64> = samples.iter().map(|s| f64::from(s.cwnd)).collect();
        let delivered: u64 = samples.iter().map(|s| u64::from(s.delivered)).sum();
        let lost: u64 = samples.iter().map(|s| u64::from(s.lost)).sum();

        println!(
            "{}: rtt {:?}, loss {}, delivered {}, lost {}",
            subflow.trace_id(),
            model.rtt,
            model.loss,
            delivered,
            lost
        );
        if cwnds.is_empty() {
            continue;
        }

        let mut s = Data::new(cwnds);
        let mean = s.mean().unwrap_or_default();
        println!(
            "\tcwnd min: {:.2}, max: {:.2}, mean: {:.2}, sd: {:.2}, median: {:.2}, p90: {:.2}",
            s.min(),
            s.max(),
            mean,
            s.std_dev().unwrap_or_default(),
            s.median(),
            s.percentile(90),
        );

        // Mean window over the round trip time.
        let rate = mean * f64::from(subflow.mss()) * 8.0 / model.rtt.as_secs_f64() / 1e6;
        println!("\testimated rate: {:.2} Mbps", rate);
        println!("\tstats: {:?}", subflow.stats());
    }
    Ok(())
}

fn main() -> Result<()> {
    // Parse simulator option.
    let option = match parse_option() {
        Ok(option) => option,
        Err(e) => e.exit(),
    };

    env_logger::builder()
        .target(mpcc_tools::log_target(&option.log_file)?)
        .filter_level(option.log_level)
        .format_timestamp_millis()
        .init();

    let conf = build_config(&option)?;
    let paths: Vec<PathModel> = option
        .rtt
        .iter()
        .zip(option.loss.iter())
        .map(|(rtt, loss)| PathModel {
            rtt: Duration::from_millis(*rtt),
            loss: *loss,
        })
        .collect();

    let mut sim = Simulator::new(&conf, &paths, !option.disable_multipath, option.seed)?;
    info!("simulate {} paths for {} rounds", paths.len(), option.rounds);

    if option.verbose {
        for round in 0..option.rounds {
            sim.run_round()?;
            let cwnds: Vec<String> = sim
                .paths()
                .map(|(_, _, samples)| {
                    samples
                        .last()
                        .map(|s| s.cwnd.to_string())
                        .unwrap_or_default()
                })
                .collect();
            println!("{} {}", round, cwnds.join(" "));
        }
    } else {
        sim.run(option.rounds)?;
    }

    print_summary(&sim)
}
