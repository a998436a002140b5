use crossbeam_channel::bounded;
use dumbarb::{cli, config::MatchPlan, runner, session};
use log::{error, info};

fn main() {
    flexi_logger::Logger::try_with_env().unwrap().start().ok();

    let Some(options) = cli::parse() else {
        return;
    };
    info!("{:#?}", &options);

    // dropping the sender trips every wait in the process
    let (cancel_tx, cancel_rx) = bounded::<()>(0);
    let mut cancel_tx = Some(cancel_tx);
    ctrlc::set_handler(move || {
        eprintln!("\ninterrupted, shutting down...");
        cancel_tx.take();
    })
    .expect("installing the interrupt handler");

    let mut failed = false;
    for config in &options.configs {
        let plan = match MatchPlan::load(config) {
            Ok(plan) => plan,
            Err(e) => {
                error!("{e:#}");
                eprintln!("{e:#}");
                failed = true;
                continue;
            }
        };
        let session = match session::prepare(&options.outdir, &plan, options.resume, options.force)
        {
            Ok(session) => session,
            Err(e) => {
                error!("{e:#}");
                eprintln!("{e:#}");
                failed = true;
                continue;
            }
        };
        match runner::run(&plan, &session, &cancel_rx) {
            Ok(runner::MatchStatus::Complete) => {}
            Ok(runner::MatchStatus::Interrupted) => {
                error!("match {}: interrupted", plan.match_name);
                failed = true;
                break;
            }
            Ok(status) => {
                error!("match {}: {status:?}", plan.match_name);
                failed = true;
            }
            Err(e) => {
                error!("match {}: {e:#}", plan.match_name);
                eprintln!("{e:#}");
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
