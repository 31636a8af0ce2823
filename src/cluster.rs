use crate::artifacts::{write_labels, write_matrix};
use crate::config::PipelineConfig;
use crate::dataset::DataSet;
use crate::error::Result;
use crate::index::RowIndex;
use crate::kmeans::{KMeansModel, MiniBatchKMeans};

/// Reduce + cluster stage: concatenate the category features, project them
/// with PCA, cluster the projection, and persist both.
pub fn run(cfg: &PipelineConfig) -> Result<KMeansModel> {
    let store = cfg.artifacts();
    let ds = DataSet::load(cfg)?;
    let index = RowIndex::read_tsv(store.index())?;
    ds.check_index(&index)?;
    log::info!("clustering {} rows x {} columns", ds.data.nrows(), ds.data.ncols());

    let reduced = ds.reduce(cfg.reduced_dims)?;
    write_matrix(&store.reduced(), &reduced)?;

    let model = MiniBatchKMeans::from_config(cfg).fit(reduced.view())?;
    write_labels(&store.labels(), &model.labels)?;
    Ok(model)
}
